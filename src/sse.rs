//! Chat stream frame parsing.
//!
//! The chat endpoint pushes `data: <json>` frames where the json carries a
//! `content` text fragment, terminated by the sentinel frame `data: [DONE]`.
//! Frames that fail to parse are logged and skipped; the stream is never
//! aborted for a bad frame.

use serde::Deserialize;
use tracing::warn;

/// Sentinel payload marking the end of a reply stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// A decoded frame from the chat stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatFrame {
    /// Incremental text fragment
    Content(String),
    /// End-of-stream sentinel
    Done,
}

#[derive(Deserialize)]
struct ChatPayload {
    content: String,
}

/// Line-oriented parser for the chat stream
#[derive(Debug, Default)]
pub struct SseParser;

impl SseParser {
    pub fn new() -> Self {
        Self
    }

    /// Feed one line from the transport.
    ///
    /// Returns `None` for blank lines, comments, and malformed frames
    /// (which are logged and skipped).
    pub fn feed_line(&mut self, line: &str) -> Option<ChatFrame> {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        let Some(payload) = line.strip_prefix("data:") else {
            warn!(line, "skipping unrecognized stream line");
            return None;
        };
        let payload = payload.trim();

        if payload == DONE_SENTINEL {
            return Some(ChatFrame::Done);
        }

        match serde_json::from_str::<ChatPayload>(payload) {
            Ok(frame) => Some(ChatFrame::Content(frame.content)),
            Err(e) => {
                warn!(error = %e, "skipping malformed stream frame");
                None
            }
        }
    }
}
