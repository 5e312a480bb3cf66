use std::time::{SystemTime, UNIX_EPOCH};

use crate::chat::events::CloseReason;

/// Stable identifier for one message in a conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one streaming exchange.
///
/// This must change on every submit so stale events from an earlier session can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    /// Creates a typed stream session identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status for one message.
///
/// Only `Streaming` accepts appended content; every other status is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Streaming(StreamSessionId),
    Done,
    Error(String),
    Cancelled,
    /// The server ended the stream without sending a terminator.
    Interrupted,
}

impl MessageStatus {
    /// Final status an open assistant message receives when its stream closes.
    pub fn from_close_reason(reason: &CloseReason) -> Self {
        match reason {
            CloseReason::Completed => Self::Done,
            CloseReason::ServerClosed => Self::Interrupted,
            CloseReason::TransportError(message) => Self::Error(message.clone()),
            CloseReason::Cancelled => Self::Cancelled,
        }
    }
}

/// One entry of the conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub created_at_unix_millis: u64,
    pub status: MessageStatus,
}

impl Message {
    /// Creates a message with explicit status, timestamped now.
    pub fn new(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            created_at_unix_millis: now_unix_millis(),
            status,
        }
    }

    /// Creates a finalized user message.
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::User, content, MessageStatus::Done)
    }

    /// Creates an empty assistant placeholder that accepts streamed content.
    pub fn assistant_streaming(id: MessageId, session_id: StreamSessionId) -> Self {
        Self::new(
            id,
            Role::Assistant,
            String::new(),
            MessageStatus::Streaming(session_id),
        )
    }

    pub fn is_open_for_append(&self) -> bool {
        matches!(self.status, MessageStatus::Streaming(_))
    }
}

/// Controller-level stream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming(StreamSessionId),
}

/// State transition input for the stream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTransition {
    Start(StreamSessionId),
    Close(StreamSessionId),
}

/// Rejection reason for illegal stream transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming {
        active: StreamSessionId,
        attempted: StreamSessionId,
    },
    NoActiveStream,
    SessionMismatch {
        active: StreamSessionId,
        attempted: StreamSessionId,
    },
}

pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// Returns the active session if and only if state is `Streaming`.
    pub fn active_session(&self) -> Option<StreamSessionId> {
        match self {
            Self::Streaming(session_id) => Some(*session_id),
            Self::Idle => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }

    /// Returns true when incoming stream data belongs to the active session.
    pub fn accepts_stream_event(&self, session_id: StreamSessionId) -> bool {
        matches!(self, Self::Streaming(active) if *active == session_id)
    }

    /// Applies one transition deterministically.
    ///
    /// `Start` is only legal from `Idle`. `Close` must name the active session exactly.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match (self, transition) {
            (Self::Idle, StreamTransition::Start(session_id)) => Ok(Self::Streaming(session_id)),
            (Self::Streaming(active), StreamTransition::Start(attempted)) => {
                Err(StreamTransitionRejection::AlreadyStreaming {
                    active: *active,
                    attempted,
                })
            }
            (Self::Streaming(active), StreamTransition::Close(session_id))
                if *active == session_id =>
            {
                Ok(Self::Idle)
            }
            (Self::Streaming(active), StreamTransition::Close(attempted)) => {
                Err(StreamTransitionRejection::SessionMismatch {
                    active: *active,
                    attempted,
                })
            }
            (Self::Idle, StreamTransition::Close(_)) => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }
}

pub(crate) fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
