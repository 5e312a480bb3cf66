use snafu::Snafu;

use crate::chat::events::CloseReason;
use crate::chat::message::{Message, MessageId, MessageStatus, StreamSessionId};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LogError {
    #[snafu(display(
        "cannot open an assistant placeholder while message {open:?} is still open on `{stage}`"
    ))]
    AssistantAlreadyOpen {
        stage: &'static str,
        open: MessageId,
    },
    #[snafu(display(
        "cannot append a user message while message {open:?} is still open on `{stage}`"
    ))]
    UserWhileOpen {
        stage: &'static str,
        open: MessageId,
    },
}

pub type LogResult<T> = Result<T, LogError>;

/// Append-only, chronologically ordered conversation.
///
/// At most one message is open for append, and it is always the most recently appended
/// assistant message. The only mutation besides appending is extending that open message.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
    open_index: Option<usize>,
    next_message_id: u64,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            open_index: None,
            next_message_id: 1,
        }
    }

    /// Appends a finalized user message.
    ///
    /// Fails while a message is open, since the open message must stay the last one.
    pub fn append_user(&mut self, text: impl Into<String>) -> LogResult<&Message> {
        if let Some(open) = self.open_message() {
            let open = open.id;
            tracing::error!(
                open_message_id = open.0,
                "refusing to append a user message behind an open message"
            );
            return UserWhileOpenSnafu {
                stage: "append-user",
                open,
            }
            .fail();
        }

        let id = self.alloc_message_id();
        Ok(self.push(Message::user(id, text)))
    }

    /// Appends an empty assistant message that accepts streamed content.
    ///
    /// Fails if another message is still open; the caller must close it first.
    pub fn open_assistant_placeholder(
        &mut self,
        session_id: StreamSessionId,
    ) -> LogResult<&Message> {
        if let Some(open) = self.open_message() {
            let open = open.id;
            tracing::error!(
                open_message_id = open.0,
                session_id = session_id.0,
                "refusing to open a second assistant placeholder"
            );
            return AssistantAlreadyOpenSnafu {
                stage: "open-assistant-placeholder",
                open,
            }
            .fail();
        }

        let id = self.alloc_message_id();
        self.open_index = Some(self.messages.len());
        Ok(self.push(Message::assistant_streaming(id, session_id)))
    }

    /// Concatenates `text` onto the open message.
    ///
    /// Returns false without touching the log when nothing is open, so late fragments
    /// arriving after close cannot corrupt finalized content.
    pub fn append_to_open(&mut self, text: &str) -> bool {
        let Some(index) = self.open_index else {
            if !text.is_empty() {
                tracing::debug!(len = text.len(), "dropping fragment with no open message");
            }
            return false;
        };

        if let Some(message) = self.messages.get_mut(index) {
            message.content.push_str(text);
            true
        } else {
            false
        }
    }

    /// Finalizes the open message as completed. No-op when nothing is open.
    pub fn close_open(&mut self) -> Option<MessageId> {
        self.close_open_with(&CloseReason::Completed)
    }

    /// Finalizes the open message with the status matching `reason`.
    pub fn close_open_with(&mut self, reason: &CloseReason) -> Option<MessageId> {
        let index = self.open_index.take()?;
        let message = self.messages.get_mut(index)?;
        message.status = MessageStatus::from_close_reason(reason);
        Some(message.id)
    }

    pub fn open_message(&self) -> Option<&Message> {
        self.open_index.and_then(|index| self.messages.get(index))
    }

    /// Read-only ordered view, including partial content of the open message.
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id.max(1));
        self.next_message_id = id.0.saturating_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::Role;

    const SESSION: StreamSessionId = StreamSessionId::new(7);

    fn contents(log: &ConversationLog) -> Vec<&str> {
        log.snapshot()
            .iter()
            .map(|message| message.content.as_str())
            .collect()
    }

    #[test]
    fn final_content_is_independent_of_chunk_boundaries() {
        let text = "The quick brown fox jumps over the lazy dog";
        for chunk_size in 1..=text.len() {
            let mut log = ConversationLog::new();
            log.open_assistant_placeholder(SESSION).unwrap();
            let bytes = text.as_bytes();
            for chunk in bytes.chunks(chunk_size) {
                log.append_to_open(std::str::from_utf8(chunk).unwrap());
            }
            log.close_open();
            assert_eq!(log.snapshot()[0].content, text, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn append_after_close_is_a_no_op() {
        let mut log = ConversationLog::new();
        log.append_user("Hello").unwrap();
        log.open_assistant_placeholder(SESSION).unwrap();
        assert!(log.append_to_open("Hi"));
        assert!(log.close_open().is_some());

        assert!(!log.append_to_open(" there"));
        assert_eq!(contents(&log), vec!["Hello", "Hi"]);
        assert_eq!(log.snapshot()[1].status, MessageStatus::Done);
        assert!(log.close_open().is_none());
    }

    #[test]
    fn second_placeholder_while_open_is_rejected() {
        let mut log = ConversationLog::new();
        let open = log.open_assistant_placeholder(SESSION).unwrap().id;

        let error = log
            .open_assistant_placeholder(StreamSessionId::new(8))
            .unwrap_err();
        assert!(matches!(error, LogError::AssistantAlreadyOpen { open: id, .. } if id == open));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn user_message_while_open_is_rejected() {
        let mut log = ConversationLog::new();
        let open = log.open_assistant_placeholder(SESSION).unwrap().id;

        let error = log.append_user("late user").unwrap_err();
        assert!(matches!(error, LogError::UserWhileOpen { open: id, .. } if id == open));

        assert!(log.append_to_open("tail"));
        assert_eq!(contents(&log), vec!["tail"]);
        let last = log.snapshot().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(log.open_message().map(|message| message.id), Some(last.id));

        log.close_open();
        log.append_user("now allowed").unwrap();
        assert_eq!(contents(&log), vec!["tail", "now allowed"]);
    }

    #[test]
    fn snapshot_reflects_partial_content_and_order() {
        let mut log = ConversationLog::new();
        log.append_user("first").unwrap();
        log.open_assistant_placeholder(SESSION).unwrap();
        log.append_to_open("par");

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].role, Role::User);
        assert!(!snapshot[0].is_open_for_append());
        assert_eq!(snapshot[1].role, Role::Assistant);
        assert_eq!(snapshot[1].content, "par");
        assert!(snapshot[1].is_open_for_append());
        assert!(snapshot[0].id < snapshot[1].id);
    }

    #[test]
    fn close_reason_is_recorded_on_the_closed_message() {
        let mut log = ConversationLog::new();
        log.open_assistant_placeholder(SESSION).unwrap();
        log.append_to_open("partial");
        log.close_open_with(&CloseReason::TransportError("connection reset".into()));

        let message = &log.snapshot()[0];
        assert_eq!(message.content, "partial");
        assert_eq!(
            message.status,
            MessageStatus::Error("connection reset".into())
        );
        assert!(log.open_message().is_none());
    }
}
