//! Error Types
//!
//! Denial is a normal outcome and surfaces as `allowed = false` on
//! [`crate::limiter::RateLimitResult`]; the error enum only comes into play
//! where a call must short-circuit (the rate-limited call wrapper) or where
//! the caller handed us an unusable configuration.

use thiserror::Error;

/// Errors produced by the rate limiting engine.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// The key is over quota or blocked; retry after the given delay.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds the caller should wait before retrying.
        retry_after_secs: u64,
    },

    /// The supplied window configuration is unusable.
    #[error("invalid rate limit configuration: {0}")]
    InvalidConfig(String),

    /// The wrapped operation itself failed (rate-limited call wrapper only).
    #[error(transparent)]
    Operation(#[from] anyhow::Error),
}

impl LimiterError {
    /// Retry delay carried by a `RateLimited` error, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            LimiterError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
