//! # Resilience Primitives
//!
//! Circuit breaking and retry-with-backoff for outbound remote calls.
//!
//! This crate provides:
//! - A normalized error taxonomy for failed calls (`CallError`)
//! - A keyed circuit breaker registry with lazy per-key state
//! - A retry executor with exponential backoff, jitter, rate-limit hints
//!   and cooperative cancellation

pub mod circuit_breaker;
pub mod error;
pub mod retry;

// Re-export commonly used types for convenience
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitMetrics, CircuitState,
};
pub use error::CallError;
pub use retry::{RETRY_AFTER_CEILING, RetryExecutor, RetryPolicy, calculate_delay};
