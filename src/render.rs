//! Rendering collaborator interface.
//!
//! Chat bubble construction, markdown, image grids, modals and scroll
//! handling all live behind this trait. The engine only decides *when* the
//! view changes; how it changes is the sink's business.

use crate::models::{Conversation, GenerationState};

pub trait RenderSink {
    /// Rebuild the view for a conversation from scratch. Any existing
    /// message surfaces are torn down and the scrolled-up flag is reset.
    fn reload_conversation(&mut self, conversation: &Conversation);

    /// Create a fresh assistant reply surface seeded with the text
    /// accumulated so far (may be empty).
    fn begin_assistant_reply(&mut self, conversation_id: &str, seed: &str);

    /// Append an incremental fragment to the current reply surface
    fn append_reply_text(&mut self, text: &str);

    /// Surface a stream/transport error to the user
    fn show_error(&mut self, message: &str);

    /// Enable or disable the send affordance
    fn set_send_enabled(&mut self, enabled: bool);

    /// Update the generation placeholder and its status line
    fn update_generation(&mut self, status_line: &str, state: &GenerationState);

    /// Surface a retry affordance after a failed or timed-out task
    fn offer_retry(&mut self, message: &str);

    /// Expose selection/continue/zoom affordances for completed slots,
    /// keyed by slot index
    fn offer_slot_actions(&mut self, completed_slots: &[usize]);

    /// Surface an informational notice (busy conversation, wait hints)
    fn notice(&mut self, message: &str);
}

/// Everything a sink was asked to do, for inspection in tests
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Reload {
        conversation_id: String,
        message_count: usize,
    },
    BeginReply {
        conversation_id: String,
        seed: String,
    },
    AppendReply(String),
    ShowError(String),
    SendEnabled(bool),
    UpdateGeneration {
        status_line: String,
        state: GenerationState,
    },
    OfferRetry(String),
    OfferSlotActions(Vec<usize>),
    Notice(String),
}

/// Sink that records every call; the tests' stand-in for a real view
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub calls: Vec<SinkCall>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }

    /// Most recent generation update, if any
    pub fn last_generation_update(&self) -> Option<(&str, &GenerationState)> {
        self.calls.iter().rev().find_map(|c| match c {
            SinkCall::UpdateGeneration { status_line, state } => {
                Some((status_line.as_str(), state))
            }
            _ => None,
        })
    }
}

impl RenderSink for RecordingSink {
    fn reload_conversation(&mut self, conversation: &Conversation) {
        self.calls.push(SinkCall::Reload {
            conversation_id: conversation.id.clone(),
            message_count: conversation.messages.len(),
        });
    }

    fn begin_assistant_reply(&mut self, conversation_id: &str, seed: &str) {
        self.calls.push(SinkCall::BeginReply {
            conversation_id: conversation_id.to_string(),
            seed: seed.to_string(),
        });
    }

    fn append_reply_text(&mut self, text: &str) {
        self.calls.push(SinkCall::AppendReply(text.to_string()));
    }

    fn show_error(&mut self, message: &str) {
        self.calls.push(SinkCall::ShowError(message.to_string()));
    }

    fn set_send_enabled(&mut self, enabled: bool) {
        self.calls.push(SinkCall::SendEnabled(enabled));
    }

    fn update_generation(&mut self, status_line: &str, state: &GenerationState) {
        self.calls.push(SinkCall::UpdateGeneration {
            status_line: status_line.to_string(),
            state: state.clone(),
        });
    }

    fn offer_retry(&mut self, message: &str) {
        self.calls.push(SinkCall::OfferRetry(message.to_string()));
    }

    fn offer_slot_actions(&mut self, completed_slots: &[usize]) {
        self.calls
            .push(SinkCall::OfferSlotActions(completed_slots.to_vec()));
    }

    fn notice(&mut self, message: &str) {
        self.calls.push(SinkCall::Notice(message.to_string()));
    }
}
