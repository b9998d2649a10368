//! # Resilient API Client
//!
//! HTTP facade over pluggable transports with per-host circuit breaking,
//! retry-with-backoff and cooperative cancellation.

pub mod classify;
pub mod client;
pub mod config;
pub mod response;
pub mod telemetry;
pub mod transport;

// Re-export commonly used types for convenience
pub use client::ApiClient;
pub use config::{ApiClientConfig, RequestOptions};
pub use resilience::{
    CallError, CircuitBreakerConfig, CircuitMetrics, CircuitState, RetryPolicy,
};
pub use response::ApiResponse;
pub use transport::{
    HttpTransport, Method, Transport, TransportError, TransportFn, TransportRequest,
    TransportResponse,
};
