use crate::chat::message::StreamSessionId;

const STREAM_LOST_MESSAGE: &str = "stream ended before a terminal event";

/// One decoded unit of streamed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Incremental assistant text. May be empty, which is a harmless no-op.
    TextDelta(String),
    /// The stream ended normally.
    Terminator,
    /// The payload could not be decoded. Carries the raw payload and the parse cause.
    DecodeError { payload: String, cause: String },
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta(text.into())
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Terminator)
    }
}

/// Why a stream session closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// A terminator was received (`[DONE]` payload or `done` event).
    Completed,
    /// The server ended the event stream without a terminator.
    ServerClosed,
    /// The connection failed to open or broke mid-stream.
    TransportError(String),
    /// The session was cancelled locally.
    Cancelled,
}

impl CloseReason {
    /// The session's event channel ended without a `Closed` event.
    pub fn stream_lost() -> Self {
        Self::TransportError(STREAM_LOST_MESSAGE.to_string())
    }
}

/// Session output, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Fragment(Fragment),
    Closed(CloseReason),
}

/// A session event tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamSessionId,
    pub payload: StreamEventPayload,
}

impl StreamEventMapped {
    pub fn fragment(target: StreamSessionId, fragment: Fragment) -> Self {
        Self {
            target,
            payload: StreamEventPayload::Fragment(fragment),
        }
    }

    pub fn closed(target: StreamSessionId, reason: CloseReason) -> Self {
        Self {
            target,
            payload: StreamEventPayload::Closed(reason),
        }
    }
}
