use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;
use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use crate::chat::{StreamEventMapped, StreamSessionId};

/// Everything needed to open one streaming exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub target: StreamSessionId,
    /// Opaque conversation id understood by the backend.
    pub session_id: String,
    pub message: String,
    pub model_id: String,
}

impl StreamRequest {
    pub fn new(
        target: StreamSessionId,
        session_id: impl Into<String>,
        message: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            target,
            session_id: session_id.into(),
            message: message.into(),
            model_id: model_id.into(),
        }
    }
}

/// One named server-sent event, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event: String,
    pub data: String,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;
/// Ordered, finite sequence of raw events for one exchange.
pub type RawEventStream = BoxStream<'static, ProviderResult<RawEvent>>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("endpoint '{endpoint}' is not a valid URL on `{stage}`: {source}"))]
    InvalidEndpoint {
        stage: &'static str,
        endpoint: String,
        source: url::ParseError,
    },
    #[snafu(display("http request failed on `{stage}`, {source}"))]
    HttpRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("chat endpoint returned status {status}: {body}"))]
    HttpStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("event stream failed on `{stage}`: {message}"))]
    EventStream {
        stage: &'static str,
        message: String,
    },
}

/// Transport seam: anything that can turn a request into an ordered stream of raw events.
pub trait ChatTransport: Send + Sync {
    fn open_events<'a>(
        &'a self,
        request: &'a StreamRequest,
    ) -> BoxFuture<'a, ProviderResult<RawEventStream>>;
}

/// Consumer side of one stream session.
///
/// Dropping it cancels the session.
pub struct ProviderEventStream {
    target: StreamSessionId,
    events: mpsc::UnboundedReceiver<StreamEventMapped>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub worker: ProviderWorker,
}

impl ProviderEventStream {
    pub(crate) fn new(
        target: StreamSessionId,
        events: mpsc::UnboundedReceiver<StreamEventMapped>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            target,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn target(&self) -> StreamSessionId {
        self.target
    }

    pub async fn recv(&mut self) -> Option<StreamEventMapped> {
        self.events.recv().await
    }

    /// Signals the worker to close with reason `Cancelled`. Safe to call repeatedly.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ProviderEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

pub(crate) fn make_event_stream(
    target: StreamSessionId,
) -> (
    mpsc::UnboundedSender<StreamEventMapped>,
    ProviderEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ProviderEventStream::new(target, event_rx, cancel_tx),
        cancel_rx,
    )
}
