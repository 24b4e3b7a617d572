//! Domain error taxonomy for the session engine.
//!
//! Transport and decode failures live in [`crate::client::ClientError`];
//! malformed stream frames and placeholder text are skipped at the parse
//! sites rather than surfaced as errors. Everything the engine itself can
//! reject is listed here.

use thiserror::Error;

use crate::client::ClientError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A second send was attempted while a reply stream is in flight
    #[error("a reply is already streaming; wait for it to complete")]
    StreamAlreadyActive,

    /// A generation task is already active; capacity is one process-wide
    #[error("another conversation is generating images, please wait for completion and retry")]
    TaskOwnershipConflict,

    /// The conversation owns an active stream or generation task
    #[error("cannot delete a conversation that is being processed; please wait for completion")]
    ConversationBusy,

    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    /// Generation task exceeded the 5 minute budget
    #[error("image generation timed out; please try again")]
    Timeout,

    #[error(transparent)]
    Network(#[from] ClientError),
}

impl EngineError {
    /// Message suitable for surfacing directly to the user
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_are_not_empty() {
        let errors = [
            EngineError::StreamAlreadyActive,
            EngineError::TaskOwnershipConflict,
            EngineError::ConversationBusy,
            EngineError::UnknownConversation("c1".to_string()),
            EngineError::Timeout,
        ];
        for err in errors {
            assert!(!err.user_message().is_empty());
        }
    }

    #[test]
    fn test_busy_message_tells_user_to_wait() {
        let msg = EngineError::ConversationBusy.user_message();
        assert!(msg.contains("wait"));
    }
}
