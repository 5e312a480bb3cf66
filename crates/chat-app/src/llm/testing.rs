//! In-memory transports for driving sessions without a network.

use std::sync::Mutex;

use futures::StreamExt;
use futures::channel::mpsc;

use super::provider::{
    BoxFuture, ChatTransport, ProviderError, ProviderResult, RawEvent, RawEventStream,
    StreamRequest,
};

#[derive(Debug, Clone)]
pub(crate) enum ScriptStep {
    Event(RawEvent),
    Fail(String),
}

/// Replays the same script for every opened stream, then ends it.
pub(crate) struct ScriptedTransport {
    script: Vec<ScriptStep>,
    opened: Mutex<Vec<StreamRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn opened_requests(&self) -> Vec<StreamRequest> {
        self.opened.lock().unwrap().clone()
    }
}

impl ChatTransport for ScriptedTransport {
    fn open_events<'a>(
        &'a self,
        request: &'a StreamRequest,
    ) -> BoxFuture<'a, ProviderResult<RawEventStream>> {
        self.opened.lock().unwrap().push(request.clone());
        let items = self
            .script
            .iter()
            .cloned()
            .map(|step| match step {
                ScriptStep::Event(event) => Ok(event),
                ScriptStep::Fail(message) => Err(ProviderError::EventStream {
                    stage: "scripted-transport",
                    message,
                }),
            })
            .collect::<Vec<_>>();

        Box::pin(async move { Ok(futures::stream::iter(items).boxed()) })
    }
}

/// Always fails to open.
pub(crate) struct FailingTransport;

impl ChatTransport for FailingTransport {
    fn open_events<'a>(
        &'a self,
        _request: &'a StreamRequest,
    ) -> BoxFuture<'a, ProviderResult<RawEventStream>> {
        Box::pin(async {
            Err(ProviderError::HttpStatus {
                stage: "failing-transport",
                status: 503,
                body: "unavailable".to_string(),
            })
        })
    }
}

/// Streams whatever the test pushes into the paired sender. Serves one stream only;
/// later opens get an empty stream.
pub(crate) struct ChannelTransport {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ProviderResult<RawEvent>>>>,
}

impl ChannelTransport {
    pub(crate) fn new() -> (Self, mpsc::UnboundedSender<ProviderResult<RawEvent>>) {
        let (sender, receiver) = mpsc::unbounded();
        (
            Self {
                receiver: Mutex::new(Some(receiver)),
            },
            sender,
        )
    }
}

impl ChatTransport for ChannelTransport {
    fn open_events<'a>(
        &'a self,
        _request: &'a StreamRequest,
    ) -> BoxFuture<'a, ProviderResult<RawEventStream>> {
        let receiver = self.receiver.lock().unwrap().take();
        Box::pin(async move {
            Ok(match receiver {
                Some(receiver) => receiver.boxed(),
                None => futures::stream::empty().boxed(),
            })
        })
    }
}
