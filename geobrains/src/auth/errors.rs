//! Authentication error types.

use crate::db::StorageError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Authentication errors.
///
/// A wrong password, unknown account, unverified email or malformed input is
/// not an error: `authorize` returns `Ok(None)` for all of them so callers
/// cannot tell them apart.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Account is temporarily locked after repeated failures
    #[error("{}", lockout_message(*retry_after_secs))]
    AccountLocked {
        retry_after_secs: u64,
        locked_until: DateTime<Utc>,
    },

    /// Password hashing failed
    #[error("Password hashing failed")]
    HashingFailed,

    /// JWT token error
    #[error("JWT error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Lockout or admin configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AuthError {
    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Storage and JWT errors are sanitized to prevent information disclosure
    /// about the internal system structure.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Storage(_) | AuthError::HashingFailed | AuthError::InvalidConfig(_) => {
                "Internal server error".to_string()
            }
            AuthError::Token(_) => "Authentication failed".to_string(),
            AuthError::AccountLocked { .. } => self.to_string(),
        }
    }
}

/// User-facing lockout message with the wait rounded up to whole minutes
pub fn lockout_message(retry_after_secs: u64) -> String {
    format!(
        "Account temporarily locked due to too many failed login attempts. Try again in {} minutes.",
        retry_after_secs.div_ceil(60)
    )
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
