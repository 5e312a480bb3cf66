//! Terminal presentation of the conversation log.
//!
//! Rendering is incremental: each call writes only what changed since the previous call.
//! Streaming messages are written line by line so fenced code blocks can be framed as
//! they arrive.

use std::collections::HashMap;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Local};
use snafu::{ResultExt, Snafu};

use crate::chat::{Message, MessageId, MessageStatus, Role};

pub const RENDER_FALLBACK_NOTICE: &str = "[this message could not be displayed]";
const FENCE: &str = "```";
const PLAIN_CODE_LANGUAGE: &str = "text";
const CLOCK_FORMAT: &str = "%H:%M:%S";
const UNKNOWN_CLOCK_TIME: &str = "--:--:--";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RenderError {
    #[snafu(display("failed to write conversation output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Turns complete content lines into terminal text.
///
/// `fence` holds the language of the code block the previous line left open, if any.
pub trait ContentFormatter {
    fn format_line(&self, line: &str, fence: &mut Option<String>, out: &mut String);

    /// Called once the message is final, to close anything still open.
    fn finish(&self, fence: &mut Option<String>, out: &mut String) {
        if fence.take().is_some() {
            out.push_str("  └─\n");
        }
    }
}

/// Frames fenced code blocks and labels them with their language.
#[derive(Debug, Clone, Copy, Default)]
pub struct FencedCodeFormatter;

impl ContentFormatter for FencedCodeFormatter {
    fn format_line(&self, line: &str, fence: &mut Option<String>, out: &mut String) {
        let trimmed = line.trim_start();
        if let Some(info) = trimmed.strip_prefix(FENCE) {
            if fence.take().is_some() {
                out.push_str("  └─\n");
            } else {
                let language = info
                    .split_whitespace()
                    .next()
                    .unwrap_or(PLAIN_CODE_LANGUAGE)
                    .to_string();
                out.push_str(&format!("  ┌─ {language}\n"));
                *fence = Some(language);
            }
            return;
        }

        if fence.is_some() {
            out.push_str("  │ ");
        } else {
            out.push_str("  ");
        }
        out.push_str(line);
        out.push('\n');
    }
}

#[derive(Debug, Default)]
struct RowState {
    header_written: bool,
    consumed: usize,
    fence: Option<String>,
    finished: bool,
}

pub struct TerminalRenderer<W, F = FencedCodeFormatter> {
    out: W,
    formatter: F,
    rows: HashMap<MessageId, RowState>,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self::with_formatter(out, FencedCodeFormatter)
    }
}

impl<W: Write, F: ContentFormatter> TerminalRenderer<W, F> {
    pub fn with_formatter(out: W, formatter: F) -> Self {
        Self {
            out,
            formatter,
            rows: HashMap::new(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Writes a one-line status notice outside of any message.
    pub fn notice(&mut self, text: &str) -> RenderResult<()> {
        writeln!(self.out, "  * {text}").context(WriteOutputSnafu {
            stage: "write-notice",
        })?;
        self.out.flush().context(WriteOutputSnafu {
            stage: "flush-output",
        })
    }

    /// Writes whatever changed in `snapshot` since the last call.
    pub fn render(&mut self, snapshot: &[Message]) -> RenderResult<()> {
        for message in snapshot {
            self.render_message(message)?;
        }
        self.out.flush().context(WriteOutputSnafu {
            stage: "flush-output",
        })
    }

    fn render_message(&mut self, message: &Message) -> RenderResult<()> {
        let formatter = &self.formatter;
        let row = self.rows.entry(message.id).or_default();
        if row.finished {
            return Ok(());
        }

        let mut buffer = String::new();
        if !row.header_written {
            buffer.push_str(&header(message));
            row.header_written = true;
        }

        let open = message.is_open_for_append();
        let pending = message.content.get(row.consumed..).unwrap_or_default();
        // Open messages only hand over complete lines; the tail waits for its newline.
        let ready = if open {
            pending.rfind('\n').map_or("", |index| &pending[..=index])
        } else {
            pending
        };

        // A formatter failure must only cost this message, never the session.
        let formatted = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut out = String::new();
            for line in ready.split_inclusive('\n') {
                formatter.format_line(line.trim_end_matches(['\n', '\r']), &mut row.fence, &mut out);
            }
            if !open {
                formatter.finish(&mut row.fence, &mut out);
            }
            out
        }));

        match formatted {
            Ok(text) => {
                buffer.push_str(&text);
                row.consumed += ready.len();
                if !open {
                    buffer.push_str(&footer(message));
                    row.finished = true;
                }
            }
            Err(_) => {
                tracing::error!(message_id = message.id.0, "message rendering failed");
                buffer.push_str("  ");
                buffer.push_str(RENDER_FALLBACK_NOTICE);
                buffer.push('\n');
                row.finished = true;
            }
        }

        self.out
            .write_all(buffer.as_bytes())
            .context(WriteOutputSnafu {
                stage: "write-message",
            })
    }
}

fn header(message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "bot",
    };
    format!(
        "[{}] {speaker}:\n",
        clock_time(message.created_at_unix_millis)
    )
}

fn footer(message: &Message) -> String {
    let mut footer = String::new();
    if message.role == Role::Assistant && message.content.trim().is_empty() {
        footer.push_str("  (empty response)\n");
    }

    match &message.status {
        MessageStatus::Error(error) => footer.push_str(&format!("  [error: {error}]\n")),
        MessageStatus::Cancelled => footer.push_str("  [cancelled]\n"),
        MessageStatus::Interrupted => {
            footer.push_str("  [connection closed before the response finished]\n");
        }
        MessageStatus::Done | MessageStatus::Streaming(_) => {}
    }

    footer
}

/// Local `HH:MM:SS` for a unix timestamp in milliseconds.
pub fn clock_time(unix_millis: u64) -> String {
    i64::try_from(unix_millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|timestamp| timestamp.with_timezone(&Local).format(CLOCK_FORMAT).to_string())
        .unwrap_or_else(|| UNKNOWN_CLOCK_TIME.to_string())
}
