#![deny(unsafe_code)]

/// Terminal chat shell.
///
/// Streams assistant responses from a server-sent-events endpoint into an append-only
/// conversation log and renders it incrementally.
pub mod app;
/// Chat domain contracts and the conversation controller.
pub mod chat;
pub mod llm;
pub mod render;
/// Settings persistence.
pub mod settings;
