//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A guarded write was refused because the current rows disallow it.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Whether retrying the same write could succeed.
    ///
    /// Constraint violations and bad rows are permanent. Lock contention,
    /// pool exhaustion, I/O and timeouts are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Io(_) => true,
            Self::Database(err) => match err {
                sqlx::Error::Database(db_err) => {
                    !(db_err.is_unique_violation()
                        || db_err.is_foreign_key_violation()
                        || db_err.is_check_violation())
                }
                sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::Io(_)
                | sqlx::Error::WorkerCrashed => true,
                _ => false,
            },
            _ => false,
        }
    }
}

/// Map a unique-constraint failure to [`MetadataError::AlreadyExists`].
pub(crate) fn map_unique(err: sqlx::Error, what: impl FnOnce() -> String) -> MetadataError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            MetadataError::AlreadyExists(what())
        }
        _ => MetadataError::Database(err),
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_classification() {
        assert!(MetadataError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(MetadataError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!MetadataError::Database(sqlx::Error::RowNotFound).is_retryable());
        assert!(!MetadataError::Constraint("dup".to_string()).is_retryable());
        assert!(!MetadataError::AlreadyExists("x".to_string()).is_retryable());
    }
}
