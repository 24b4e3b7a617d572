//! Placeholder text grammar.
//!
//! Task state is persisted inline inside the placeholder message, so it has
//! to survive a text round trip:
//!
//! ```text
//! <human status summary>
//!
//! Image generation result:
//! task_id: <id>
//! Image1: <url-or-status> (<prompt, truncated to 100 chars>)
//! ...
//! Image4: ...
//! ```
//!
//! The structured [`GenerationState`] attached to the message is the
//! authoritative form; this grammar exists for display and for recovering
//! tasks from snapshots written by older clients.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{GenerationState, ImageSlot, SlotStatus, SLOT_COUNT};

/// URLs starting with this prefix mark a completed slot
pub const GENERATED_IMAGE_PREFIX: &str = "/static/generated_images/";

/// Literal header line between the status summary and the slot lines
pub const RESULT_HEADER: &str = "Image generation result:";

/// Prompts longer than this are truncated with a trailing "..."
pub const PROMPT_TRUNCATE_LEN: usize = 100;

/// Status line used while the placeholder exists but no task id does yet
pub const PREPARING_STATUS: &str = "Preparing to generate diverse images... (Pending)";

/// Status line committed when a task exceeds its time budget
pub const TIMEOUT_STATUS: &str = "⏰ Image generation timed out. Please try again.";

static IMAGE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^image\s*(\d+):\s*([^(]+?)(?:\s*\(([^)]*)\))?\s*$").unwrap());

static TASK_ID_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"task_id:\s*([A-Za-z0-9_-]+)").unwrap());

/// Whether a message content looks like a generation placeholder
pub fn is_placeholder(content: &str) -> bool {
    content.contains(RESULT_HEADER)
        || content.contains("task_id:")
        || content.contains("Preparing to generate")
        || content.contains("Generating diverse images")
}

/// Serialize a task's state into placeholder text
pub fn encode(status_line: &str, state: &GenerationState) -> String {
    let mut out = format!("{}\n\n{}\n", status_line.trim(), RESULT_HEADER);
    if let Some(task_id) = &state.task_id {
        out.push_str(&format!("task_id: {}\n", task_id));
    }
    for (i, slot) in state.slots.iter().enumerate() {
        let value = match (&slot.status, &slot.url) {
            (SlotStatus::Completed, Some(url)) => url.clone(),
            _ => slot.status.as_str().to_string(),
        };
        let prompt_info = if slot.prompt.is_empty() {
            String::new()
        } else {
            format!(" ({})", truncate_prompt(&slot.prompt))
        };
        out.push_str(&format!("Image{}: {}{}\n", i + 1, value, prompt_info));
    }
    out.trim_end().to_string()
}

/// Reconstruct task state from placeholder text.
///
/// Returns `None` when the content does not look like a placeholder at all.
/// Individual lines that fail to parse leave their slot at the pending
/// default; a slot value's first token decides its status, with unknown
/// tokens defaulting to pending.
pub fn parse(content: &str) -> Option<GenerationState> {
    if !is_placeholder(content) {
        return None;
    }

    let mut state = GenerationState::preparing();
    for line in content.lines() {
        if let Some(caps) = TASK_ID_LINE.captures(line) {
            state.task_id = Some(caps[1].to_string());
            continue;
        }
        let Some(caps) = IMAGE_LINE.captures(line.trim()) else {
            continue;
        };
        let index: usize = match caps[1].parse::<usize>() {
            Ok(n) if (1..=SLOT_COUNT).contains(&n) => n - 1,
            _ => continue,
        };
        let value = caps[2].trim();
        let prompt = caps
            .get(3)
            .map(|m| restore_prompt(m.as_str()))
            .unwrap_or_default();

        state.slots[index] = if value.starts_with(GENERATED_IMAGE_PREFIX) {
            ImageSlot {
                status: SlotStatus::Completed,
                url: Some(value.to_string()),
                prompt,
            }
        } else {
            let status = match value {
                "failed" => SlotStatus::Failed,
                "generating" => SlotStatus::Generating,
                _ => SlotStatus::Pending,
            };
            ImageSlot {
                status,
                url: None,
                prompt,
            }
        };
    }
    Some(state)
}

/// Status summary while the task is still making progress
pub fn progress_status_line(state: &GenerationState) -> String {
    let completed = state.completed_count();
    let generating = state.generating_count();
    let pending = state.pending_count();
    let failed = state.failed_count();
    let failed_info = if failed > 0 {
        format!(", Failed: {}", failed)
    } else {
        String::new()
    };

    if generating > 0 || pending > 0 {
        format!(
            "Generating diverse images... (Completed: {}/4, Generating: {}, Pending: {}{})",
            completed, generating, pending, failed_info
        )
    } else {
        format!(
            "Preparing diverse images... (Completed: {}/4{})",
            completed, failed_info
        )
    }
}

/// Status summary for a terminal task: all four succeeded, a partial
/// success with counts, or all failed
pub fn final_status_line(state: &GenerationState) -> String {
    let completed = state.completed_count();
    let failed = state.failed_count();
    if completed == SLOT_COUNT {
        "🎉 All four different style images have been generated successfully!".to_string()
    } else if completed > 0 {
        let failed_info = if failed > 0 {
            format!(", {} failed", failed)
        } else {
            String::new()
        };
        format!(
            "✅ Image generation completed! Successfully generated {} images{}.",
            completed, failed_info
        )
    } else {
        "❌ Image generation failed. Please try again.".to_string()
    }
}

/// Undo the truncation marker `encode` appends. A trailing "..." is
/// stripped only when the text before it is exactly the truncation
/// length; prompts that genuinely end in an ellipsis pass through intact.
fn restore_prompt(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(stripped) = raw.strip_suffix("...") {
        if stripped.chars().count() == PROMPT_TRUNCATE_LEN {
            return stripped.to_string();
        }
    }
    raw.to_string()
}

fn truncate_prompt(prompt: &str) -> String {
    if prompt.chars().count() > PROMPT_TRUNCATE_LEN {
        let truncated: String = prompt.chars().take(PROMPT_TRUNCATE_LEN).collect();
        format!("{}...", truncated)
    } else {
        prompt.to_string()
    }
}
