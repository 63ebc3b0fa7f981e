//! Error types for the action engine.
//!
//! `ActionError` covers everything that can go wrong around an Action
//! without being a state-machine decision. Illegal transitions are never
//! errors: control operations return `false` and leave the state unchanged.
//!
//! ## Error Hierarchy
//!
//! - **`NotFinal`**: an operation that needs a finished Action (logging) was
//!   given one that is still live.
//! - **`NoRegisteredAction`**: re-running or building an Action whose info
//!   type has no registered constructor. Recoverable; surfaced to the user.
//! - **`InvalidParameters`**: a registered constructor rejected the
//!   parameters stored in an `ActionInfo`.
//! - **`Store`**: the log's persistence collaborator failed. Reported to the
//!   error monitor, never retried and never blocking the queue.
//! - **`RunnerStopped`**: the Runner actor has shut down and no longer
//!   answers commands.

use thiserror::Error;

use crate::action::ActionState;

/// Convenience alias for results using the engine error type.
pub type ActionResult<T> = std::result::Result<T, ActionError>;

/// Errors raised around Actions, the Runner and the log.
#[derive(Error, Debug)]
pub enum ActionError {
    /// A finished Action was required.
    #[error("Action is not finished (state: {0})")]
    NotFinal(ActionState),

    /// No constructor for this info type.
    #[error("No action implementation registered for info type '{0}'")]
    NoRegisteredAction(String),

    /// A constructor rejected the stored parameters.
    #[error("Invalid parameters for '{type_name}': {reason}")]
    InvalidParameters { type_name: String, reason: String },

    /// The log backend failed.
    #[error("Log store error: {0}")]
    Store(String),

    /// No log entry with this id.
    #[error("Log entry not found: {0}")]
    EntryNotFound(uuid::Uuid),

    /// The Runner actor is gone.
    #[error("Action runner has stopped")]
    RunnerStopped,

    /// A log entry or parameter set did not (de)serialize.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ActionError {
    /// Build a `Store` error from anything displayable.
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ActionError::NoRegisteredAction("motor_move".to_string());
        assert_eq!(
            err.to_string(),
            "No action implementation registered for info type 'motor_move'"
        );
    }

    #[test]
    fn test_not_final_names_state() {
        let err = ActionError::NotFinal(ActionState::Running);
        assert!(err.to_string().contains("Running"));
    }
}
