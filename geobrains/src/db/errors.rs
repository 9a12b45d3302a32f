//! Storage error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the persistence layer
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Operation timed out
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    /// Referenced account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    /// A stored row could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Store refused the operation
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = StorageError::Timeout(Duration::from_secs(5));
        assert!(err.to_string().contains("timed out"));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_from_sqlx() {
        let err: StorageError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StorageError::Database(_)));
    }
}
