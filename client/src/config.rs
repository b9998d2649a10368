use std::collections::HashMap;
use std::time::Duration;

use resilience::{CircuitBreakerConfig, RetryPolicy};
use tokio_util::sync::CancellationToken;

/// Configuration for the API client. Everything here is fixed at
/// construction; per-call knobs live in [`RequestOptions`].
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL every request path is joined to.
    pub base_url: String,
    /// Per-attempt timeout (default: 30s).
    pub timeout: Duration,
    /// Optional bearer credential sent as the `authorization` header.
    pub credential: Option<String>,
    /// Extra headers attached to every request.
    pub default_headers: HashMap<String, String>,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            credential: None,
            default_headers: HashMap::new(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-call options layered over the client defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers for this call; they win over client defaults.
    pub headers: HashMap<String, String>,
    /// Override of the per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Cancels the whole call: backoff sleeps and in-flight I/O.
    pub cancel: Option<CancellationToken>,
}
