use std::sync::Arc;

use snafu::{ResultExt, Snafu, ensure};

use crate::chat::events::{CloseReason, Fragment, StreamEventMapped, StreamEventPayload};
use crate::chat::log::{ConversationLog, LogError};
use crate::chat::message::{Message, StreamSessionId, StreamState, StreamTransition};
use crate::llm::{ChatTransport, ProviderEventStream, StreamRequest, StreamSession};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ControllerError {
    #[snafu(display("refusing to send an empty message"))]
    EmptyInput { stage: &'static str },
    #[snafu(display("a response is still streaming for session {active:?}"))]
    AlreadyStreaming {
        stage: &'static str,
        active: StreamSessionId,
    },
    #[snafu(display("no Tokio runtime available on `{stage}`: {source}"))]
    NoRuntime {
        stage: &'static str,
        source: tokio::runtime::TryCurrentError,
    },
    #[snafu(display("conversation log rejected `{stage}`: {source}"))]
    Log {
        stage: &'static str,
        source: LogError,
    },
}

pub type ControllerResult<T> = Result<T, ControllerError>;

/// Single-threaded reducer that turns user input and session events into log mutations.
///
/// Only one session is live at a time; submissions while streaming are rejected. Events
/// are only applied when they carry the active session id, so anything arriving from a
/// cancelled or finished session is dropped.
pub struct ChatController {
    transport: Arc<dyn ChatTransport>,
    session_id: String,
    selected_model: String,
    log: ConversationLog,
    state: StreamState,
    next_stream_session_id: u64,
    active_stream: Option<ProviderEventStream>,
}

impl ChatController {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        session_id: impl Into<String>,
        selected_model: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            session_id: session_id.into(),
            selected_model: selected_model.into(),
            log: ConversationLog::new(),
            state: StreamState::Idle,
            next_stream_session_id: 1,
            active_stream: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming()
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn snapshot(&self) -> &[Message] {
        self.log.snapshot()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    /// Changes the model used by the next submission. In-flight sessions keep theirs.
    pub fn select_model(&mut self, model_id: &str) -> bool {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            return false;
        }
        self.selected_model = model_id.to_string();
        tracing::debug!(model_id = %self.selected_model, "model selected");
        true
    }

    /// Appends the user message and an open assistant placeholder, then starts streaming.
    ///
    /// Must be called from within a Tokio runtime; the session worker is spawned onto it.
    pub fn submit(&mut self, text: &str) -> ControllerResult<StreamSessionId> {
        let text = text.trim();
        ensure!(!text.is_empty(), EmptyInputSnafu { stage: "submit" });

        if let Some(active) = self.state.active_session() {
            tracing::warn!(active = ?active, "rejecting submission while streaming");
            return AlreadyStreamingSnafu {
                stage: "submit",
                active,
            }
            .fail();
        }

        let runtime =
            tokio::runtime::Handle::try_current().context(NoRuntimeSnafu { stage: "submit" })?;

        let target = self.alloc_stream_session_id();
        let next_state = match self.state.apply(StreamTransition::Start(target)) {
            Ok(next_state) => next_state,
            Err(rejection) => {
                tracing::error!(rejection = ?rejection, "stream start rejected");
                return AlreadyStreamingSnafu {
                    stage: "submit-transition",
                    active: self.state.active_session().unwrap_or(target),
                }
                .fail();
            }
        };

        // Idle never has an open message; close any leftover so the placeholder can open.
        if let Some(stale) = self.log.close_open_with(&CloseReason::Cancelled) {
            tracing::warn!(message_id = stale.0, "closed stale open message before submit");
        }

        self.log.append_user(text).context(LogSnafu {
            stage: "append-user-message",
        })?;
        self.log
            .open_assistant_placeholder(target)
            .context(LogSnafu {
                stage: "open-assistant-placeholder",
            })?;

        let request = StreamRequest::new(
            target,
            self.session_id.clone(),
            text,
            self.selected_model.clone(),
        );
        tracing::info!(
            stream = ?target,
            model_id = %request.model_id,
            "submitting message"
        );

        let handle = StreamSession::open(self.transport.clone(), request);
        runtime.spawn(handle.worker);

        self.state = next_state;
        self.active_stream = Some(handle.stream);

        Ok(target)
    }

    /// Waits for the next event of the active session. Returns `None` when idle.
    ///
    /// Cancel-safe, so it can sit in a `tokio::select!` next to user input.
    pub async fn next_stream_event(&mut self) -> Option<StreamEventMapped> {
        let active = self.active_stream.as_mut()?;
        match active.recv().await {
            Some(event) => Some(event),
            None => Some(StreamEventMapped::closed(
                active.target(),
                CloseReason::stream_lost(),
            )),
        }
    }

    /// Applies one session event. Returns false when the event was stale and ignored.
    pub fn handle_stream_event(&mut self, event: StreamEventMapped) -> bool {
        if !self.stream_event_is_current(event.target) {
            tracing::debug!(stream = ?event.target, "dropping event from inactive session");
            return false;
        }

        match event.payload {
            StreamEventPayload::Fragment(Fragment::TextDelta(text)) => {
                self.log.append_to_open(&text);
            }
            StreamEventPayload::Fragment(Fragment::Terminator) => {
                tracing::debug!(stream = ?event.target, "terminator received");
            }
            StreamEventPayload::Fragment(Fragment::DecodeError { payload, cause }) => {
                // One malformed event must not abort an otherwise healthy stream.
                tracing::warn!(
                    stream = ?event.target,
                    payload = %payload,
                    cause = %cause,
                    "skipping undecodable stream event"
                );
            }
            StreamEventPayload::Closed(reason) => {
                self.finish_stream(event.target, reason);
            }
        }

        true
    }

    /// Pumps the active session until it closes.
    pub async fn run_until_idle(&mut self) {
        while let Some(event) = self.next_stream_event().await {
            self.handle_stream_event(event);
        }
    }

    /// Cancels the active session and finalizes the partial response. No-op when idle.
    pub fn cancel(&mut self) -> bool {
        let Some(active) = self.active_stream.as_mut() else {
            return false;
        };
        active.cancel();
        let target = active.target();
        self.finish_stream(target, CloseReason::Cancelled);
        true
    }

    fn finish_stream(&mut self, target: StreamSessionId, reason: CloseReason) {
        if !self.stream_event_is_current(target) {
            return;
        }

        match self.state.apply(StreamTransition::Close(target)) {
            Ok(next_state) => self.state = next_state,
            Err(rejection) => {
                tracing::error!(rejection = ?rejection, "stream close rejected");
                return;
            }
        }

        let closed = self.log.close_open_with(&reason);
        // Dropping the stream releases the session; a still-running worker sees the cancel.
        self.active_stream = None;

        tracing::info!(
            stream = ?target,
            reason = ?reason,
            message_id = ?closed,
            "response finalized"
        );
    }

    fn stream_event_is_current(&self, target: StreamSessionId) -> bool {
        self.active_stream
            .as_ref()
            .is_some_and(|active| active.target() == target)
            && self.state.accepts_stream_event(target)
    }

    fn alloc_stream_session_id(&mut self) -> StreamSessionId {
        let id = StreamSessionId::new(self.next_stream_session_id);
        self.next_stream_session_id = self.next_stream_session_id.saturating_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::{MessageStatus, Role};
    use crate::llm::testing::{ChannelTransport, ScriptStep, ScriptedTransport};
    use crate::llm::{DEFAULT_MODEL, RawEvent};

    fn chunk(text: &str) -> RawEvent {
        RawEvent::new(
            "chat",
            format!(r#"{{"choices":[{{"delta":{{"content":"{text}"}}}}]}}"#),
        )
    }

    fn summary(controller: &ChatController) -> Vec<(Role, String, bool)> {
        controller
            .snapshot()
            .iter()
            .map(|message| {
                (
                    message.role,
                    message.content.clone(),
                    message.is_open_for_append(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn streams_a_response_into_one_assistant_message() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptStep::Event(chunk("He")),
            ScriptStep::Event(chunk("llo")),
            ScriptStep::Event(RawEvent::new("chat", "[DONE]")),
        ]));
        let mut controller = ChatController::new(transport.clone(), "default", DEFAULT_MODEL);

        controller.submit("Hello").unwrap();
        assert!(controller.is_streaming());
        assert_eq!(
            summary(&controller),
            vec![
                (Role::User, "Hello".to_string(), false),
                (Role::Assistant, String::new(), true),
            ]
        );

        controller.run_until_idle().await;

        assert_eq!(controller.state(), StreamState::Idle);
        assert_eq!(
            summary(&controller),
            vec![
                (Role::User, "Hello".to_string(), false),
                (Role::Assistant, "Hello".to_string(), false),
            ]
        );
        assert_eq!(controller.snapshot()[1].status, MessageStatus::Done);

        let requests = transport.opened_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message, "Hello");
        assert_eq!(requests[0].session_id, "default");
        assert_eq!(requests[0].model_id, DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn decode_error_does_not_abort_the_stream() {
        let (transport, sender) = ChannelTransport::new();
        let mut controller = ChatController::new(Arc::new(transport), "default", DEFAULT_MODEL);
        controller.submit("Hi").unwrap();

        sender
            .unbounded_send(Ok(RawEvent::new("chat", "not json")))
            .unwrap();
        let event = controller.next_stream_event().await.unwrap();
        assert!(matches!(
            event.payload,
            StreamEventPayload::Fragment(Fragment::DecodeError { .. })
        ));
        assert!(controller.handle_stream_event(event));
        assert!(controller.is_streaming());

        sender.unbounded_send(Ok(chunk("ok"))).unwrap();
        sender.unbounded_send(Ok(RawEvent::new("done", ""))).unwrap();
        controller.run_until_idle().await;

        assert_eq!(controller.snapshot()[1].content, "ok");
        assert_eq!(controller.state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn cancel_keeps_partial_content_and_ignores_late_fragments() {
        let (transport, sender) = ChannelTransport::new();
        let mut controller = ChatController::new(Arc::new(transport), "default", DEFAULT_MODEL);
        let target = controller.submit("Tell me a story").unwrap();

        sender.unbounded_send(Ok(chunk("Once"))).unwrap();
        let event = controller.next_stream_event().await.unwrap();
        controller.handle_stream_event(event);

        assert!(controller.cancel());
        assert_eq!(controller.state(), StreamState::Idle);
        assert!(!controller.cancel());

        let assistant = &controller.snapshot()[1];
        assert_eq!(assistant.content, "Once");
        assert_eq!(assistant.status, MessageStatus::Cancelled);
        assert!(!assistant.is_open_for_append());

        let _ = sender.unbounded_send(Ok(chunk(" upon")));
        assert!(controller.next_stream_event().await.is_none());
        assert!(!controller.handle_stream_event(StreamEventMapped::fragment(
            target,
            Fragment::text(" upon"),
        )));
        assert_eq!(controller.snapshot()[1].content, "Once");
    }

    #[tokio::test]
    async fn submissions_while_streaming_are_rejected() {
        let (transport, _sender) = ChannelTransport::new();
        let mut controller = ChatController::new(Arc::new(transport), "default", DEFAULT_MODEL);
        let active = controller.submit("first").unwrap();

        let error = controller.submit("second").unwrap_err();
        assert!(matches!(
            error,
            ControllerError::AlreadyStreaming { active: id, .. } if id == active
        ));
        assert_eq!(controller.log().len(), 2);
        assert_eq!(
            controller
                .snapshot()
                .iter()
                .filter(|message| message.is_open_for_append())
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn blank_input_is_rejected_and_text_is_trimmed() {
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptStep::Event(
            RawEvent::new("done", ""),
        )]));
        let mut controller = ChatController::new(transport.clone(), "default", DEFAULT_MODEL);

        assert!(matches!(
            controller.submit("   \n"),
            Err(ControllerError::EmptyInput { .. })
        ));
        assert!(controller.log().is_empty());

        controller.submit("  padded  ").unwrap();
        controller.run_until_idle().await;
        assert_eq!(controller.snapshot()[0].content, "padded");
        assert_eq!(transport.opened_requests()[0].message, "padded");
    }

    #[tokio::test]
    async fn model_is_read_at_submit_time() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptStep::Event(chunk("x")),
            ScriptStep::Event(RawEvent::new("done", "")),
        ]));
        let mut controller = ChatController::new(transport.clone(), "default", DEFAULT_MODEL);

        controller.submit("one").unwrap();
        assert!(controller.select_model("mistralai/mixtral-8x7b-instruct"));
        assert!(!controller.select_model("  "));
        controller.run_until_idle().await;

        controller.submit("two").unwrap();
        controller.run_until_idle().await;

        let models = transport
            .opened_requests()
            .into_iter()
            .map(|request| request.model_id)
            .collect::<Vec<_>>();
        assert_eq!(
            models,
            vec![
                DEFAULT_MODEL.to_string(),
                "mistralai/mixtral-8x7b-instruct".to_string()
            ]
        );
        assert_eq!(controller.log().len(), 4);
    }

    #[tokio::test]
    async fn transport_error_finalizes_truncated_response() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptStep::Event(chunk("trunc")),
            ScriptStep::Fail("connection reset".into()),
        ]));
        let mut controller = ChatController::new(transport, "default", DEFAULT_MODEL);

        controller.submit("Hello").unwrap();
        controller.run_until_idle().await;

        let assistant = &controller.snapshot()[1];
        assert_eq!(assistant.content, "trunc");
        assert!(matches!(&assistant.status, MessageStatus::Error(message) if message.contains("connection reset")));
        assert_eq!(controller.state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn server_close_without_terminator_returns_to_idle() {
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptStep::Event(chunk("cut"))]));
        let mut controller = ChatController::new(transport, "default", DEFAULT_MODEL);

        controller.submit("Hello").unwrap();
        controller.run_until_idle().await;

        assert_eq!(controller.snapshot()[1].status, MessageStatus::Interrupted);
        assert!(!controller.is_streaming());
    }

    struct VanishingTransport;

    impl ChatTransport for VanishingTransport {
        fn open_events<'a>(
            &'a self,
            _request: &'a StreamRequest,
        ) -> crate::llm::BoxFuture<'a, crate::llm::ProviderResult<crate::llm::RawEventStream>>
        {
            panic!("worker died");
        }
    }

    #[tokio::test]
    async fn vanished_worker_is_reported_as_lost_stream() {
        let mut controller = ChatController::new(Arc::new(VanishingTransport), "default", DEFAULT_MODEL);

        controller.submit("Hello").unwrap();
        controller.run_until_idle().await;

        assert!(!controller.is_streaming());
        assert_eq!(
            controller.snapshot()[1].status,
            MessageStatus::from_close_reason(&CloseReason::stream_lost())
        );
    }

    #[test]
    fn submit_requires_a_runtime() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let mut controller = ChatController::new(transport, "default", DEFAULT_MODEL);

        assert!(matches!(
            controller.submit("Hello"),
            Err(ControllerError::NoRuntime { .. })
        ));
        assert!(controller.log().is_empty());
        assert!(!controller.is_streaming());
    }
}
