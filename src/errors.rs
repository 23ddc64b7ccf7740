//! Typed error hierarchy for the stagehand engine.
//!
//! Two enums cover the two subsystems:
//! - `SequenceError` - construction and startup failures
//! - `InboxError` - mailbox signaling failures

use thiserror::Error;

use crate::sequence::SequenceState;

/// Errors surfaced to callers of the sequence engine.
///
/// Per-stage failures are not errors: they flow through the outcome and
/// update channels as ordinary data. Only construction mistakes and starting
/// a sequence twice are fatal to the caller.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("sequence already started (state: {state:?})")]
    AlreadyStarted { state: SequenceState },

    #[error("sequence requires at least one stage")]
    EmptyStageList,

    #[error("duplicate stage name: {name}")]
    DuplicateStage { name: String },
}

/// Errors from the control mailbox.
#[derive(Debug, Error)]
pub enum InboxError {
    #[error("inbox is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_started_carries_state() {
        let err = SequenceError::AlreadyStarted {
            state: SequenceState::InProgress,
        };
        match &err {
            SequenceError::AlreadyStarted { state } => {
                assert_eq!(*state, SequenceState::InProgress);
            }
            _ => panic!("Expected AlreadyStarted variant"),
        }
        assert!(err.to_string().contains("InProgress"));
    }

    #[test]
    fn duplicate_stage_names_the_offender() {
        let err = SequenceError::DuplicateStage {
            name: "Fetch".to_string(),
        };
        assert!(err.to_string().contains("Fetch"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&SequenceError::EmptyStageList);
        assert_std_error(&InboxError::Closed);
    }
}
