//! Decoding of raw stream events into [`Fragment`]s.
//!
//! Decoding never fails past this boundary: malformed payloads become
//! [`Fragment::DecodeError`] and the caller decides what to do with them.

use serde::Deserialize;

use crate::chat::events::Fragment;

/// Event name carrying content chunks.
pub const CHAT_EVENT: &str = "chat";
/// Event name signalling normal completion, regardless of payload.
pub const DONE_EVENT: &str = "done";
/// In-band completion marker.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Model-internal turn markers that must never reach the conversation.
pub const TURN_MARKER_TOKENS: &[&str] = &[
    "<s>",
    "</s>",
    "<|begin_of_text|>",
    "<|end_of_text|>",
    "<|eot_id|>",
    "<|im_start|>",
    "<|im_end|>",
];

#[derive(Debug, Default, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentDecoder;

impl FragmentDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decodes one raw event into a fragment.
    pub fn decode(&self, event_name: &str, payload: &str) -> Fragment {
        if event_name == DONE_EVENT {
            return Fragment::Terminator;
        }

        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            return Fragment::Terminator;
        }

        if payload.is_empty() {
            return Fragment::TextDelta(String::new());
        }

        match serde_json::from_str::<ChunkPayload>(payload) {
            Ok(chunk) => Fragment::TextDelta(Self::filter_turn_marker(Self::first_delta(chunk))),
            Err(error) => Fragment::DecodeError {
                payload: payload.to_string(),
                cause: error.to_string(),
            },
        }
    }

    fn first_delta(chunk: ChunkPayload) -> String {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return String::new();
        };

        match choice.delta {
            Some(delta) => delta.content.unwrap_or_default(),
            // Completion-style chunks carry the text directly on the choice.
            None => choice.text.unwrap_or_default(),
        }
    }

    fn filter_turn_marker(text: String) -> String {
        if TURN_MARKER_TOKENS.contains(&text.as_str()) {
            String::new()
        } else {
            text
        }
    }
}
