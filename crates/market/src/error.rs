// crates/market/src/error.rs
use kabu_view_jobs::JobError;
use thiserror::Error;

/// Domain errors from the persisted store and the external quotes API.
///
/// Both trait seams collapse their transport-level details into these
/// variants; the strategies propagate them with `?` and the job runner
/// turns whatever reaches it into a short user-visible failure string.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(String),

    #[error("market data API error: {0}")]
    Api(String),

    #[error("{0}")]
    Inconsistent(String),
}

impl SyncError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api(message.into())
    }
}

impl From<SyncError> for JobError {
    fn from(err: SyncError) -> Self {
        JobError::failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_short_and_prefixed() {
        assert_eq!(
            SyncError::api("timeout on /prices/daily_quotes").to_string(),
            "market data API error: timeout on /prices/daily_quotes"
        );
        assert_eq!(SyncError::store("locked").to_string(), "store error: locked");
    }

    #[test]
    fn test_converts_to_job_failure() {
        let err: JobError = SyncError::api("down").into();
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "market data API error: down");
    }
}
