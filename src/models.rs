//! Core data model shared across the engine.
//!
//! The persisted snapshot shape mirrors what the backend and older clients
//! wrote: a map of conversation id to conversation record plus the current
//! conversation id. serde renames bind the Rust field names to that shape.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Status of one image slot within a generation task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Pending => "pending",
            SlotStatus::Generating => "generating",
            SlotStatus::Completed => "completed",
            SlotStatus::Failed => "failed",
        }
    }

    /// Whether this slot needs no further polling
    pub fn is_terminal(&self) -> bool {
        matches!(self, SlotStatus::Completed | SlotStatus::Failed)
    }
}

/// One of the four fixed image positions within a generation task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSlot {
    pub status: SlotStatus,
    /// Present iff status is Completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Free text, may be empty
    #[serde(default)]
    pub prompt: String,
}

impl ImageSlot {
    pub fn pending() -> Self {
        Self {
            status: SlotStatus::Pending,
            url: None,
            prompt: String::new(),
        }
    }
}

/// Number of image slots in every generation task
pub const SLOT_COUNT: usize = 4;

/// Structured generation-task state carried alongside a placeholder message.
///
/// The human-readable placeholder text is regenerated from this for display
/// and persistence, so prompts containing grammar-like substrings cannot
/// corrupt the recorded state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationState {
    /// None until the backend has committed a task id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub slots: [ImageSlot; SLOT_COUNT],
}

impl GenerationState {
    /// Fresh state with four pending slots and no task id
    pub fn preparing() -> Self {
        Self {
            task_id: None,
            slots: [
                ImageSlot::pending(),
                ImageSlot::pending(),
                ImageSlot::pending(),
                ImageSlot::pending(),
            ],
        }
    }

    pub fn completed_count(&self) -> usize {
        self.count(SlotStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(SlotStatus::Failed)
    }

    pub fn generating_count(&self) -> usize {
        self.count(SlotStatus::Generating)
    }

    pub fn pending_count(&self) -> usize {
        self.count(SlotStatus::Pending)
    }

    fn count(&self, status: SlotStatus) -> usize {
        self.slots.iter().filter(|s| s.status == status).count()
    }

    /// All four slots have resolved to completed or failed
    pub fn is_terminal(&self) -> bool {
        self.completed_count() + self.failed_count() == SLOT_COUNT
    }

    /// A task id is recorded and at least one slot is still unresolved.
    /// Such a state is eligible for re-attachment after a reload or switch.
    pub fn is_unresolved(&self) -> bool {
        self.task_id.is_some() && !self.is_terminal()
    }

    /// Indices of completed slots, used for the selection affordances
    pub fn completed_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == SlotStatus::Completed)
            .map(|(i, _)| i)
            .collect()
    }
}

/// A single message within a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Set only on the placeholder message a generation task is updating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationState>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            generation: None,
        }
    }
}

/// An independent conversation thread
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(rename = "created", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastMessageTime", default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            messages: Vec::new(),
            created_at: Utc::now(),
            last_message_at: None,
        }
    }

    /// Sort key for the conversation list: last activity, else creation time
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

/// Everything the persistence collaborator stores between sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub chats: HashMap<String, Conversation>,
    #[serde(rename = "currentChatId", default)]
    pub current_chat_id: Option<String>,
}

/// Request body for the chat stream endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub chat_id: String,
}

/// Request body for the generation start endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub chat_id: String,
}

/// Response from the generation start endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateResponse {
    pub task_id: String,
}

/// One entry of the generation status endpoint's `images` array
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotStatusEntry {
    pub status: SlotStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Response from the generation status endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub images: Vec<SlotStatusEntry>,
}
