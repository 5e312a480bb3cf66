use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::chat::{
    CloseReason, Fragment, FragmentDecoder, StreamEventMapped, StreamEventPayload, StreamSessionId,
};

use super::provider::{
    ChatTransport, ProviderEventStream, ProviderStreamHandle, ProviderWorker, StreamRequest,
    make_event_stream,
};

/// One streaming exchange for one outgoing user message.
///
/// Raw events are decoded and forwarded in arrival order, followed by exactly one
/// `Closed` event. Nothing is forwarded after `Closed`. There is no reconnect.
pub struct StreamSession;

impl StreamSession {
    /// Prepares a session. Nothing is sent until the returned worker is polled.
    pub fn open(transport: Arc<dyn ChatTransport>, request: StreamRequest) -> ProviderStreamHandle {
        let (event_tx, stream, cancel_rx) = make_event_stream(request.target);
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            transport, request, event_tx, cancel_rx,
        ));

        ProviderStreamHandle { stream, worker }
    }

    async fn run_stream_worker(
        transport: Arc<dyn ChatTransport>,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<StreamEventMapped>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let target = request.target;
        let decoder = FragmentDecoder::new();
        let mut sink = SessionSink::new(target, event_tx);

        let opened = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(stream = ?target, "stream cancelled before connection opened");
                sink.close(CloseReason::Cancelled);
                return;
            }
            opened = transport.open_events(&request) => opened,
        };

        let mut events = match opened {
            Ok(events) => events,
            Err(error) => {
                tracing::error!(
                    stream = ?target,
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open chat stream"
                );
                sink.close(CloseReason::TransportError(error.to_string()));
                return;
            }
        };

        tracing::info!(stream = ?target, model_id = %request.model_id, "chat stream opened");

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(stream = ?target, "chat stream cancelled");
                    sink.close(CloseReason::Cancelled);
                    break;
                }
                next_event = events.next() => {
                    match next_event {
                        Some(Ok(raw)) => {
                            let fragment = decoder.decode(&raw.event, &raw.data);
                            let terminal = fragment.is_terminator();
                            if !sink.forward(fragment) {
                                return;
                            }
                            if terminal {
                                sink.close(CloseReason::Completed);
                                break;
                            }
                        }
                        Some(Err(error)) => {
                            tracing::warn!(
                                stream = ?target,
                                error = %error,
                                "chat stream failed mid-stream"
                            );
                            sink.close(CloseReason::TransportError(error.to_string()));
                            break;
                        }
                        None => {
                            tracing::debug!(stream = ?target, "server closed stream without terminator");
                            sink.close(CloseReason::ServerClosed);
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Producer side of a session. Enforces the single `Closed` event.
struct SessionSink {
    target: StreamSessionId,
    event_tx: mpsc::UnboundedSender<StreamEventMapped>,
    closed: bool,
}

impl SessionSink {
    fn new(target: StreamSessionId, event_tx: mpsc::UnboundedSender<StreamEventMapped>) -> Self {
        Self {
            target,
            event_tx,
            closed: false,
        }
    }

    /// Returns false once the session is closed or the consumer is gone.
    fn forward(&mut self, fragment: Fragment) -> bool {
        if self.closed {
            return false;
        }
        self.event_tx
            .send(StreamEventMapped::fragment(self.target, fragment))
            .is_ok()
    }

    fn close(&mut self, reason: CloseReason) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::info!(stream = ?self.target, reason = ?reason, "chat stream closed");
        let _ = self
            .event_tx
            .send(StreamEventMapped::closed(self.target, reason));
    }
}

impl ProviderEventStream {
    /// Callback-style consumption: invokes `on_fragment` for every fragment in arrival order,
    /// then `on_closed` once with the close reason.
    ///
    /// If the worker disappears without closing, `on_closed` receives
    /// [`CloseReason::stream_lost`].
    pub async fn dispatch<F, C>(mut self, mut on_fragment: F, on_closed: C)
    where
        F: FnMut(Fragment),
        C: FnOnce(CloseReason),
    {
        while let Some(event) = self.recv().await {
            match event.payload {
                StreamEventPayload::Fragment(fragment) => on_fragment(fragment),
                StreamEventPayload::Closed(reason) => {
                    on_closed(reason);
                    return;
                }
            }
        }
        on_closed(CloseReason::stream_lost());
    }
}
