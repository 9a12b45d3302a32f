//! Error types for security module

use thiserror::Error;

/// Result type for rate limiting operations
pub type RateLimiterResult<T> = Result<T, RateLimitError>;

/// Rate limiter configuration errors
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// A route class was configured with a zero-length window
    #[error("Invalid window for {route_class}: must be at least one second")]
    InvalidWindow { route_class: &'static str },

    /// The identity cap must allow at least one tracked identity
    #[error("Invalid identity capacity: must be greater than 0")]
    InvalidCapacity,
}
