//! Stream router: owns the single in-flight assistant reply.
//!
//! State machine: `Idle -> Streaming -> {Completed, Failed} -> Idle`.
//! Chunks are accumulated in arrival order regardless of which conversation
//! is displayed; only forwarding to the view depends on visibility. The
//! underlying network read is never cancelled — switching away merely stops
//! UI forwarding.

use tracing::{debug, warn};

use crate::error::EngineError;
use crate::models::MessageRole;
use crate::render::RenderSink;
use crate::store::ConversationStore;

/// Committed in place of the reply when the transport fails while the
/// owning conversation is visible
pub const STREAM_FALLBACK_MESSAGE: &str =
    "Sorry, an error occurred while processing your request. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Streaming,
}

pub struct StreamRouter {
    phase: Phase,
    owner: Option<String>,
    accumulated: String,
    /// Whether the view currently has a live reply surface for this stream.
    /// Cleared when a conversation reload tears the surface down.
    surface_attached: bool,
}

impl StreamRouter {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            owner: None,
            accumulated: String::new(),
            surface_attached: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.phase == Phase::Streaming
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Whether an active stream belongs to `conversation_id`
    pub fn owns(&self, conversation_id: &str) -> bool {
        self.is_streaming() && self.owner.as_deref() == Some(conversation_id)
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    /// Begin a reply stream for a conversation.
    ///
    /// Exactly one stream may be in flight process-wide.
    pub fn start(&mut self, conversation_id: &str) -> Result<(), EngineError> {
        if self.phase != Phase::Idle {
            return Err(EngineError::StreamAlreadyActive);
        }
        self.phase = Phase::Streaming;
        self.owner = Some(conversation_id.to_string());
        self.accumulated.clear();
        self.surface_attached = false;
        Ok(())
    }

    /// The view was rebuilt; any reply surface it held is gone
    pub fn detach_surface(&mut self) {
        self.surface_attached = false;
    }

    /// Re-create the reply surface seeded with everything accumulated so
    /// far. Called after a reload when the owner conversation is displayed.
    pub fn reattach(&mut self, sink: &mut dyn RenderSink) {
        let Some(owner) = self.owner.clone() else {
            return;
        };
        if !self.is_streaming() {
            return;
        }
        sink.begin_assistant_reply(&owner, &self.accumulated);
        self.surface_attached = true;
    }

    /// Apply an incremental text fragment.
    ///
    /// Always appended to the accumulated text; forwarded to the sink only
    /// when the owner conversation is the active one. Hidden chunks are
    /// absorbed silently with no data loss.
    pub fn on_chunk(&mut self, text: &str, active_id: &str, sink: &mut dyn RenderSink) {
        if !self.is_streaming() {
            debug!("dropping chunk with no active stream");
            return;
        }
        self.accumulated.push_str(text);

        if self.owner.as_deref() != Some(active_id) {
            return;
        }

        if self.surface_attached {
            sink.append_reply_text(text);
        } else {
            // Surface was torn down by a reload; rebuild it with the
            // full accumulated text so nothing is lost
            let owner = self.owner.clone().unwrap_or_default();
            sink.begin_assistant_reply(&owner, &self.accumulated);
            self.surface_attached = true;
        }
    }

    /// Stream-end sentinel: commit the reply and return `(owner, text)` so
    /// the caller can inspect the final text for a generation directive.
    pub fn on_done(
        &mut self,
        store: &mut ConversationStore,
        sink: &mut dyn RenderSink,
    ) -> Option<(String, String)> {
        if !self.is_streaming() {
            warn!("stream done with no active stream");
            return None;
        }
        let owner = self.owner.clone()?;
        let text = std::mem::take(&mut self.accumulated);

        store.append(&owner, MessageRole::Assistant, &text);
        self.finish(sink);
        Some((owner, text))
    }

    /// Transport error: commit a fixed fallback message when the owner is
    /// visible, otherwise only log. Either way the router returns to idle.
    pub fn on_error(
        &mut self,
        error: &str,
        active_id: &str,
        store: &mut ConversationStore,
        sink: &mut dyn RenderSink,
    ) {
        if !self.is_streaming() {
            warn!(error, "stream error with no active stream");
            return;
        }
        let owner = self.owner.clone().unwrap_or_default();

        if owner == active_id {
            store.append(&owner, MessageRole::Assistant, STREAM_FALLBACK_MESSAGE);
            sink.show_error(STREAM_FALLBACK_MESSAGE);
        } else {
            warn!(conversation_id = %owner, error, "stream failed for hidden conversation");
        }
        self.finish(sink);
    }

    /// Guaranteed cleanup on both terminal paths: back to idle, send
    /// affordance re-enabled.
    fn finish(&mut self, sink: &mut dyn RenderSink) {
        self.phase = Phase::Idle;
        self.owner = None;
        self.accumulated.clear();
        self.surface_attached = false;
        sink.set_send_enabled(true);
    }
}

impl Default for StreamRouter {
    fn default() -> Self {
        Self::new()
    }
}
