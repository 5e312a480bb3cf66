/// Orchestration of submissions, sessions and the conversation log.
pub mod controller;
/// Raw event payload decoding.
pub mod decoder;
/// Event contracts between stream sessions and the controller.
pub mod events;
pub mod log;
/// Domain entities and deterministic stream state boundaries.
pub mod message;

pub use controller::{ChatController, ControllerError, ControllerResult};
pub use decoder::{CHAT_EVENT, DONE_EVENT, DONE_SENTINEL, FragmentDecoder, TURN_MARKER_TOKENS};
pub use events::{CloseReason, Fragment, StreamEventMapped, StreamEventPayload};
pub use log::{ConversationLog, LogError, LogResult};
pub use message::{
    Message, MessageId, MessageStatus, Role, StreamSessionId, StreamState, StreamTransition,
    StreamTransitionRejection, StreamTransitionResult,
};
