use std::process::ExitCode;

use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use chatt::app::ChatApp;
use chatt::chat::ChatController;
use chatt::llm::create_transport;
use chatt::render::TerminalRenderer;
use chatt::settings::SettingsStore;

const DEFAULT_LOG_FILTER: &str = "chatt=info";

/// Application entry point.
///
/// Loads settings, builds the SSE transport for the configured endpoint and runs the
/// interactive shell on stdin/stdout. Logs go to stderr so they never interleave with
/// the conversation.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    tracing::info!(
        config_path = ?settings_store.config_path(),
        endpoint = %settings.endpoint,
        session_id = %settings.session_id,
        "settings loaded"
    );

    let transport = match create_transport(&settings.endpoint) {
        Ok(transport) => transport,
        Err(error) => {
            tracing::error!(error = %error, "failed to create chat transport");
            return ExitCode::FAILURE;
        }
    };

    let controller = ChatController::new(
        transport,
        settings.session_id.clone(),
        settings.default_model.clone(),
    );
    let renderer = TerminalRenderer::new(std::io::stdout());
    let mut app = ChatApp::new(controller, renderer, settings.configured_models())
        .with_settings(settings_store);

    match app.run(BufReader::new(tokio::io::stdin())).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "chat shell stopped");
            ExitCode::FAILURE
        }
    }
}
