use std::sync::Arc;

mod endpoint;
mod model;
mod provider;
mod session;
mod sse_transport;
#[cfg(test)]
pub(crate) mod testing;

pub use endpoint::{MESSAGE_PARAM, MODEL_PARAM, SESSION_ID_PARAM, stream_url};
pub use model::{DEFAULT_MODEL, Model, default_models};
pub use provider::{
    BoxFuture, ChatTransport, ProviderError, ProviderEventStream, ProviderResult,
    ProviderStreamHandle, ProviderWorker, RawEvent, RawEventStream, StreamRequest,
};
pub use session::StreamSession;
pub use sse_transport::SseTransport;

/// Builds the production transport for `endpoint`.
pub fn create_transport(endpoint: &str) -> ProviderResult<Arc<dyn ChatTransport>> {
    Ok(Arc::new(SseTransport::new(endpoint)?))
}
