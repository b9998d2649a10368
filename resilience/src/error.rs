use std::time::Duration;

use thiserror::Error;

/// Every way an outbound call can fail, normalized so the retry executor can
/// make decisions without knowing which transport produced the failure.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid request (status {status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error (status {0})")]
    ServerError(u16),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Circuit breaker open for {key}: retry in {retry_in:?}")]
    CircuitOpen { key: String, retry_in: Duration },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl CallError {
    /// Default retry predicate. Transient faults are retryable; callers that
    /// sent a bad request or bad credentials will not do better on attempt
    /// two, and cancellations and open circuits must surface as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallError::RateLimited { .. }
                | CallError::Network(_)
                | CallError::ServerError(_)
                | CallError::Unknown(_)
        )
    }

    /// Server-provided delay hint. Only rate-limit responses carry one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CallError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::Authentication(_) => "authentication",
            CallError::InvalidRequest { .. } => "invalid_request",
            CallError::RateLimited { .. } => "rate_limited",
            CallError::Network(_) => "network",
            CallError::ServerError(_) => "server_error",
            CallError::Cancelled => "cancelled",
            CallError::CircuitOpen { .. } => "circuit_open",
            CallError::Configuration(_) => "configuration",
            CallError::Unknown(_) => "unknown",
        }
    }
}
