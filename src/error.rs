use crate::types::VotingStage;

/// Result type for all orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can surface from queue, voting and standings operations.
///
/// Callers own retry and backoff; nothing in the core retries internally. A
/// `Store` error means the operation failed as a whole and applied nothing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or unacceptable input, rejected before any mutation
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation collides with current state (active session, duplicate
    /// submission, closed queue)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown entry, cup, series or session
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is not valid for the session's current stage
    #[error("invalid in stage {stage:?}: {message}")]
    State {
        stage: VotingStage,
        message: String,
    },

    /// Durable-store call failed; the operation was not applied
    #[error("store error: {0}")]
    Store(String),
}

impl Error {
    pub fn state(stage: VotingStage, message: impl Into<String>) -> Self {
        Self::State {
            stage,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_error_carries_stage() {
        let err = Error::state(VotingStage::Average, "cannot advance");
        match err {
            Error::State { stage, .. } => assert_eq!(stage, VotingStage::Average),
            _ => panic!("expected state error"),
        }
    }

    #[test]
    fn test_display_includes_detail() {
        let err = Error::Conflict("queue is closed".to_string());
        assert_eq!(err.to_string(), "conflict: queue is closed");
    }
}
