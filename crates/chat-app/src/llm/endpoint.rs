use snafu::ResultExt;
use url::Url;

use super::provider::{InvalidEndpointSnafu, ProviderResult, StreamRequest};

pub const SESSION_ID_PARAM: &str = "sessionId";
pub const MESSAGE_PARAM: &str = "message";
pub const MODEL_PARAM: &str = "model";

/// Builds the streaming GET URL for `request`.
///
/// Query parameters already present on `endpoint` are kept. The session id, message and model
/// are always escaped, so model ids like `openai/gpt-3.5-turbo` and free-form user text survive
/// the trip intact.
pub fn stream_url(endpoint: &str, request: &StreamRequest) -> ProviderResult<Url> {
    let mut url = Url::parse(endpoint.trim()).context(InvalidEndpointSnafu {
        stage: "parse-stream-endpoint",
        endpoint: endpoint.to_string(),
    })?;

    url.query_pairs_mut()
        .append_pair(SESSION_ID_PARAM, &request.session_id)
        .append_pair(MESSAGE_PARAM, &request.message)
        .append_pair(MODEL_PARAM, &request.model_id);

    Ok(url)
}
