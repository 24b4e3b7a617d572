//! Image generation task management.
//!
//! At most one four-slot generation task exists process-wide. Its lifecycle:
//! a placeholder message is appended up front (preparing), the backend
//! commits a task id, then a single poll timer drives status fetches until
//! every slot is terminal or the time budget runs out. Switching
//! conversations never stops polling; it only decides whether updates reach
//! the view.
//!
//! The manager is a synchronous state machine. The session controller owns
//! the async side: it spawns the sleep task for each poll and hands the
//! abort handle back via [`GenerationTaskManager::set_timer`], and it
//! performs the actual status fetch when [`handle_poll_due`] asks for one.
//!
//! [`handle_poll_due`]: GenerationTaskManager::handle_poll_due

pub mod grammar;

use std::time::{Duration, Instant};

use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::models::{
    GenerationState, Message, MessageRole, SlotStatus, StatusResponse, SLOT_COUNT,
};
use crate::render::RenderSink;
use crate::store::ConversationStore;

/// Cadence between successful status fetches
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Cadence after a failed status fetch
pub const POLL_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Wall-clock budget for a task before it is failed out
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// What the caller should do with the poll timer after an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDirective {
    Reschedule(Duration),
    Stop,
}

struct GenerationTask {
    owner: String,
    /// None between the placeholder append and the backend's commit
    task_id: Option<String>,
    state: GenerationState,
    started_at: Instant,
}

#[derive(Default)]
pub struct GenerationTaskManager {
    task: Option<GenerationTask>,
    timer: Option<AbortHandle>,
}

impl GenerationTaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_task(&self) -> bool {
        self.task.is_some()
    }

    /// Whether the current task belongs to `conversation_id`
    pub fn owns(&self, conversation_id: &str) -> bool {
        self.task
            .as_ref()
            .map(|t| t.owner == conversation_id)
            .unwrap_or(false)
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task.as_ref().and_then(|t| t.task_id.as_deref())
    }

    pub fn owner(&self) -> Option<&str> {
        self.task.as_ref().map(|t| t.owner.as_str())
    }

    /// Append the placeholder message and reserve the single task slot.
    ///
    /// Fails with an ownership conflict while any task exists, including
    /// one still waiting for its task id.
    pub fn start_preparing(
        &mut self,
        owner: &str,
        store: &mut ConversationStore,
        sink: &mut dyn RenderSink,
        active_id: &str,
    ) -> Result<(), EngineError> {
        if self.task.is_some() {
            return Err(EngineError::TaskOwnershipConflict);
        }

        let state = GenerationState::preparing();
        let mut message = Message::new(
            MessageRole::Assistant,
            grammar::encode(grammar::PREPARING_STATUS, &state),
        );
        message.generation = Some(state.clone());
        store.append_message(owner, message);

        if owner == active_id {
            sink.update_generation(grammar::PREPARING_STATUS, &state);
        }

        self.task = Some(GenerationTask {
            owner: owner.to_string(),
            task_id: None,
            state,
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Record the task id the backend committed and start the time budget
    pub fn commit_start(
        &mut self,
        task_id: &str,
        store: &mut ConversationStore,
        sink: &mut dyn RenderSink,
        active_id: &str,
    ) {
        let Some(task) = self.task.as_mut() else {
            warn!(task_id, "commit_start with no pending task");
            return;
        };
        info!(task_id, conversation_id = %task.owner, "generation task started");
        task.task_id = Some(task_id.to_string());
        task.state.task_id = Some(task_id.to_string());
        task.started_at = Instant::now();

        let line = grammar::progress_status_line(&task.state);
        let owner = task.owner.clone();
        let state = task.state.clone();
        write_placeholder(store, &owner, &line, &state);
        if owner == active_id {
            sink.update_generation(&line, &state);
        }
    }

    /// The start request itself failed: fail all four slots and release
    /// the task slot so a retry can claim it.
    pub fn fail_start(
        &mut self,
        store: &mut ConversationStore,
        sink: &mut dyn RenderSink,
        active_id: &str,
    ) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        self.cancel_timer();
        for slot in &mut task.state.slots {
            slot.status = SlotStatus::Failed;
        }
        let line = grammar::final_status_line(&task.state);
        write_placeholder(store, &task.owner, &line, &task.state);
        if task.owner == active_id {
            sink.update_generation(&line, &task.state);
            sink.offer_retry(&line);
        }
    }

    /// A poll timer fired. Returns the task id to fetch status for, or
    /// `Ok(None)` when there is nothing to do (no task, or no id yet).
    /// When the time budget has expired the task is failed out and the
    /// timeout error is returned for the caller to surface.
    pub fn handle_poll_due(
        &mut self,
        store: &mut ConversationStore,
        sink: &mut dyn RenderSink,
        active_id: &str,
    ) -> Result<Option<String>, EngineError> {
        let Some(task) = self.task.as_ref() else {
            return Ok(None);
        };
        let Some(task_id) = task.task_id.clone() else {
            return Ok(None);
        };

        if task.started_at.elapsed() >= GENERATION_TIMEOUT {
            self.fail_timeout(store, sink, active_id);
            return Err(EngineError::Timeout);
        }
        Ok(Some(task_id))
    }

    /// Fold a status response into the task and persist the placeholder.
    ///
    /// Entries beyond the four slots are ignored; short responses leave the
    /// remaining slots untouched.
    pub fn apply_status(
        &mut self,
        response: &StatusResponse,
        store: &mut ConversationStore,
        sink: &mut dyn RenderSink,
        active_id: &str,
    ) -> PollDirective {
        let Some(task) = self.task.as_mut() else {
            warn!("status response with no active task");
            return PollDirective::Stop;
        };

        for (slot, entry) in task.state.slots.iter_mut().zip(response.images.iter()) {
            slot.status = entry.status;
            slot.url = entry.url.clone();
            if let Some(prompt) = &entry.prompt {
                slot.prompt = prompt.clone();
            }
        }
        if response.images.len() != SLOT_COUNT {
            debug!(
                entries = response.images.len(),
                "status response with unexpected slot count"
            );
        }

        let terminal = task.state.is_terminal();
        let line = if terminal {
            grammar::final_status_line(&task.state)
        } else {
            grammar::progress_status_line(&task.state)
        };
        let owner = task.owner.clone();
        let state = task.state.clone();
        write_placeholder(store, &owner, &line, &state);

        if owner == active_id {
            sink.update_generation(&line, &state);
            if terminal {
                let completed = state.completed_indices();
                if completed.is_empty() {
                    sink.offer_retry(&line);
                } else {
                    sink.offer_slot_actions(&completed);
                }
            }
        }

        if terminal {
            info!(
                completed = state.completed_count(),
                failed = state.failed_count(),
                "generation task finished"
            );
            self.clear();
            PollDirective::Stop
        } else {
            PollDirective::Reschedule(POLL_INTERVAL)
        }
    }

    /// A status fetch failed: keep the task and retry on the slower cadence
    pub fn on_poll_error(&mut self, error: &str) -> PollDirective {
        match &self.task {
            Some(task) => {
                warn!(task_id = ?task.task_id, error, "status fetch failed, will retry");
                PollDirective::Reschedule(POLL_RETRY_INTERVAL)
            }
            None => PollDirective::Stop,
        }
    }

    /// The displayed conversation owns an in-flight task again; the caller
    /// should fetch status immediately to resync the view.
    pub fn promote(&self, active_id: &str) -> Option<String> {
        let task = self.task.as_ref()?;
        if task.owner != active_id {
            return None;
        }
        task.task_id.clone()
    }

    /// Re-attach to an unresolved task found in a conversation's history.
    ///
    /// Looks at the last assistant message only. Prefers the structured
    /// state; placeholders written by older clients are parsed from text
    /// and upgraded in place. Returns the task id to fetch immediately.
    /// No-op while another task is active.
    pub fn recover(
        &mut self,
        conversation_id: &str,
        store: &mut ConversationStore,
    ) -> Option<String> {
        if self.task.is_some() {
            return None;
        }
        let conversation = store.get(conversation_id)?;
        let last = conversation
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)?;

        let (state, from_text) = match &last.generation {
            Some(state) => (state.clone(), false),
            None => (grammar::parse(&last.content)?, true),
        };
        if !state.is_unresolved() {
            return None;
        }
        let task_id = state.task_id.clone()?;

        if from_text {
            let upgraded = state.clone();
            store.rewrite_last(
                conversation_id,
                |m| m.role == MessageRole::Assistant,
                move |m| m.generation = Some(upgraded),
            );
        }

        info!(task_id, conversation_id, "re-attached to unresolved generation task");
        self.task = Some(GenerationTask {
            owner: conversation_id.to_string(),
            task_id: Some(task_id.clone()),
            state,
            // The original start time is not persisted; restart the budget
            started_at: Instant::now(),
        });
        Some(task_id)
    }

    /// Drop the task if `conversation_id` owns it. Used when the owning
    /// conversation is deleted.
    pub fn release_if_owner(&mut self, conversation_id: &str) -> bool {
        if !self.owns(conversation_id) {
            return false;
        }
        self.clear();
        true
    }

    /// Replace the poll timer handle, aborting any previous one
    pub fn set_timer(&mut self, handle: AbortHandle) {
        self.cancel_timer();
        self.timer = Some(handle);
    }

    /// Abort the poll timer if one is armed. Safe to call repeatedly.
    pub fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    fn clear(&mut self) {
        self.cancel_timer();
        self.task = None;
    }

    fn fail_timeout(
        &mut self,
        store: &mut ConversationStore,
        sink: &mut dyn RenderSink,
        active_id: &str,
    ) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        self.cancel_timer();
        warn!(task_id = ?task.task_id, "generation task timed out");

        // Failing the unresolved slots keeps the persisted placeholder
        // terminal, so a later reload will not re-attach to a dead task
        for slot in &mut task.state.slots {
            if !slot.status.is_terminal() {
                slot.status = SlotStatus::Failed;
            }
        }
        write_placeholder(store, &task.owner, grammar::TIMEOUT_STATUS, &task.state);
        if task.owner == active_id {
            sink.update_generation(grammar::TIMEOUT_STATUS, &task.state);
            sink.offer_retry(grammar::TIMEOUT_STATUS);
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        if let Some(task) = self.task.as_mut() {
            task.started_at -= by;
        }
    }
}

fn write_placeholder(
    store: &mut ConversationStore,
    owner: &str,
    status_line: &str,
    state: &GenerationState,
) {
    let content = grammar::encode(status_line, state);
    let state = state.clone();
    let rewritten = store.rewrite_last(
        owner,
        |m| m.role == MessageRole::Assistant && m.generation.is_some(),
        move |m| {
            m.content = content;
            m.generation = Some(state);
        },
    );
    if !rewritten {
        warn!(conversation_id = %owner, "generation placeholder message not found");
    }
}

/// Marker the assistant emits in a completed reply to request generation
pub const DRAWING_DIRECTIVE: &str = "DRAWING_FINAL:";

/// Prompt used when the directive carries no usable text before it
pub const DEFAULT_PROMPT: &str = "A beautiful artwork, high quality, detailed, masterpiece";

/// Extract the generation prompt from a completed reply, if the reply asks
/// for one. The prompt is the text before the marker; a blank prefix falls
/// back to a stock prompt.
pub fn extract_prompt(reply: &str) -> Option<String> {
    let marker = reply.find(DRAWING_DIRECTIVE)?;
    let prompt = reply[..marker].trim();
    if prompt.is_empty() {
        Some(DEFAULT_PROMPT.to_string())
    } else {
        Some(prompt.to_string())
    }
}
