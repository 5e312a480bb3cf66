//! Interactive terminal shell around [`ChatController`].
//!
//! One task drives everything: it waits on the next input line and the next stream
//! event at the same time, applies whichever arrives first, then re-renders.

use std::io::Write;

use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::chat::{ChatController, ControllerError};
use crate::llm::Model;
use crate::render::{RenderError, TerminalRenderer};
use crate::settings::{ClientSettings, SettingsStore};

const HELP_TEXT: &str = "commands: /model <id>, /models, /cancel, /quit (or /exit), /help";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to render on `{stage}`: {source}"))]
    Render {
        stage: &'static str,
        source: RenderError,
    },
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    SelectModel(String),
    ListModels,
    Cancel,
    Quit,
    Help,
}

/// Parses one input line. Blank lines yield `None`.
///
/// Anything that is not a known slash command is sent as a message, so a literal
/// leading slash can still be typed by prefixing it with a space.
pub fn parse_command(line: &str) -> Option<Command> {
    if line.trim().is_empty() {
        return None;
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Send(line.to_string()));
    };
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let argument = parts.next().unwrap_or_default().trim();

    let command = match name {
        "model" if !argument.is_empty() => Command::SelectModel(argument.to_string()),
        "model" | "models" => Command::ListModels,
        "cancel" => Command::Cancel,
        "quit" | "exit" => Command::Quit,
        "help" => Command::Help,
        _ => Command::Send(line.to_string()),
    };
    Some(command)
}

pub struct ChatApp<W: Write> {
    controller: ChatController,
    renderer: TerminalRenderer<W>,
    models: Vec<Model>,
    settings: Option<SettingsStore>,
}

impl<W: Write> ChatApp<W> {
    pub fn new(controller: ChatController, renderer: TerminalRenderer<W>, models: Vec<Model>) -> Self {
        Self {
            controller,
            renderer,
            models,
            settings: None,
        }
    }

    /// Persists `/model` selections as the default model of `store`.
    pub fn with_settings(mut self, store: SettingsStore) -> Self {
        self.settings = Some(store);
        self
    }

    pub fn controller(&self) -> &ChatController {
        &self.controller
    }

    pub fn renderer(&self) -> &TerminalRenderer<W> {
        &self.renderer
    }

    /// Runs until `/quit` or end of input.
    ///
    /// At end of input the active response, if any, is allowed to finish first.
    pub async fn run<R>(&mut self, input: R) -> AppResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        self.notice(&format!(
            "session `{}` using {}. {HELP_TEXT}",
            self.controller.session_id(),
            self.controller.selected_model()
        ))?;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context(ReadInputSnafu { stage: "read-line" })? else {
                        tracing::debug!("input closed");
                        self.controller.run_until_idle().await;
                        self.render()?;
                        return Ok(());
                    };
                    if !self.handle_line(&line)? {
                        return Ok(());
                    }
                }
                Some(event) = self.controller.next_stream_event() => {
                    if self.controller.handle_stream_event(event) {
                        self.render()?;
                    }
                }
            }
        }
    }

    /// Applies one input line. Returns `false` when the shell should exit.
    pub fn handle_line(&mut self, line: &str) -> AppResult<bool> {
        let Some(command) = parse_command(line) else {
            return Ok(true);
        };

        match command {
            Command::Send(text) => match self.controller.submit(&text) {
                Ok(_) => self.render()?,
                Err(ControllerError::AlreadyStreaming { .. }) => {
                    self.notice("still responding; wait or /cancel first")?;
                }
                Err(ControllerError::EmptyInput { .. }) => {}
                Err(error) => {
                    tracing::error!(error = %error, "submission failed");
                    self.notice(&format!("could not send: {error}"))?;
                }
            },
            Command::SelectModel(model_id) => {
                if self.controller.select_model(&model_id) {
                    let model_id = self.controller.selected_model().to_string();
                    if self.models.iter().any(|model| model.id == model_id) {
                        self.notice(&format!("model set to {model_id}"))?;
                    } else {
                        self.notice(&format!("model set to {model_id} (not in the configured list)"))?;
                    }
                    self.persist_model(&model_id)?;
                }
            }
            Command::ListModels => {
                let listing = self
                    .models
                    .iter()
                    .map(|model| {
                        let marker = if model.id == self.controller.selected_model() {
                            ">"
                        } else {
                            " "
                        };
                        match &model.description {
                            Some(description) => {
                                format!("{marker} {} ({}): {description}", model.id, model.name)
                            }
                            None => format!("{marker} {} ({})", model.id, model.name),
                        }
                    })
                    .collect::<Vec<_>>();
                for line in listing {
                    self.notice(&line)?;
                }
            }
            Command::Cancel => {
                if self.controller.cancel() {
                    self.render()?;
                } else {
                    self.notice("nothing to cancel")?;
                }
            }
            Command::Quit => {
                self.controller.cancel();
                self.render()?;
                return Ok(false);
            }
            Command::Help => self.notice(HELP_TEXT)?,
        }

        Ok(true)
    }

    fn persist_model(&mut self, model_id: &str) -> AppResult<()> {
        let Some(store) = &self.settings else {
            return Ok(());
        };

        let settings = ClientSettings {
            default_model: model_id.to_string(),
            ..store.settings().as_ref().clone()
        };
        if let Err(error) = store.update(settings) {
            tracing::warn!(error = %error, "failed to save model selection");
            self.notice(&format!("could not save model selection: {error}"))?;
        }
        Ok(())
    }

    fn render(&mut self) -> AppResult<()> {
        self.renderer
            .render(self.controller.snapshot())
            .context(RenderSnafu {
                stage: "render-conversation",
            })
    }

    fn notice(&mut self, text: &str) -> AppResult<()> {
        self.renderer.notice(text).context(RenderSnafu {
            stage: "render-notice",
        })
    }
}
