// crates/jobs/src/error.rs
use thiserror::Error;

/// Errors surfaced by a job body to the runner.
///
/// [`JobError::Cancelled`] is the distinguished cancellation signal: the
/// runner classifies it as an intentional `cancelled` outcome instead of a
/// failure, without string-matching business data.
#[derive(Debug, Error)]
pub enum JobError {
    /// Cooperative cancellation observed at a suspension point.
    #[error("job cancelled")]
    Cancelled,

    /// Bad request detected before any stage ran (e.g. a sync mode that
    /// requires an initialized store). The message is user-actionable.
    #[error("{message}")]
    Config { message: String },

    /// Unrecoverable failure inside the body. Already retried locally where
    /// that makes sense; never retried at the job level.
    #[error("{message}")]
    Failed { message: String },
}

impl JobError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// True for the distinguished cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_short_and_human_readable() {
        assert_eq!(JobError::Cancelled.to_string(), "job cancelled");
        assert_eq!(
            JobError::config("Database not initialized. Use mode=initial first.").to_string(),
            "Database not initialized. Use mode=initial first."
        );
        assert_eq!(JobError::failed("API unreachable").to_string(), "API unreachable");
    }

    #[test]
    fn test_is_cancelled() {
        assert!(JobError::Cancelled.is_cancelled());
        assert!(!JobError::failed("boom").is_cancelled());
    }
}
