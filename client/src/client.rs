//! # API Client
//!
//! Resilient facade over a pluggable transport.
//!
//! ## Call Pattern
//! - Normalize the request: method, joined URL, merged headers, body,
//!   per-attempt timeout, optional cancellation token
//! - Gate on the circuit breaker keyed by the target host, failing fast
//!   while the circuit is open
//! - Drive the transport through the retry executor (exponential backoff
//!   with jitter, rate-limit hints, cooperative cancellation)
//! - Classify every outcome into the normalized error taxonomy

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use resilience::{
    CallError, CircuitBreakerRegistry, CircuitMetrics, CircuitState, RetryExecutor, RetryPolicy,
};
use tracing::debug;
use url::Url;

use crate::classify::{classify_response, classify_transport_error};
use crate::config::{ApiClientConfig, RequestOptions};
use crate::response::ApiResponse;
use crate::telemetry;
use crate::transport::{HttpTransport, Method, Transport, TransportRequest};

pub struct ApiClient {
    base_url: String,
    base_host: String,
    timeout: Duration,
    credential: Option<String>,
    default_headers: HashMap<String, String>,
    retry: RetryPolicy,
    transport: Arc<dyn Transport>,
    executor: RetryExecutor,
}

impl ApiClient {
    /// Build a client over the default reqwest engine.
    pub fn new(config: ApiClientConfig) -> Result<Self, CallError> {
        Self::with_transport(config, Arc::new(HttpTransport::new()))
    }

    /// Build a client over any transport engine: a host-provided request
    /// function, a test double, or the default HTTP engine.
    pub fn with_transport(
        config: ApiClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, CallError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url).map_err(|error| {
            CallError::Configuration(format!("invalid base URL {base_url:?}: {error}"))
        })?;
        let base_host = parsed
            .host_str()
            .ok_or_else(|| CallError::Configuration(format!("base URL {base_url:?} has no host")))?
            .to_string();

        let default_headers = config
            .default_headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();

        Ok(Self {
            base_url,
            base_host,
            timeout: config.timeout,
            credential: config.credential,
            default_headers,
            retry: with_retry_telemetry(config.retry),
            transport,
            executor: RetryExecutor::new(Arc::new(CircuitBreakerRegistry::new(
                config.circuit_breaker,
            ))),
        })
    }

    pub async fn get(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, CallError> {
        self.request(Method::Get, path, None, options).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> Result<ApiResponse, CallError> {
        self.request(Method::Post, path, Some(body), options).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> Result<ApiResponse, CallError> {
        self.request(Method::Put, path, Some(body), options).await
    }

    pub async fn delete(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, CallError> {
        self.request(Method::Delete, path, None, options).await
    }

    /// Send one call through the circuit breaker and retry executor.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, CallError> {
        let request = self.build_request(method, path, body, &options);
        let circuit_key = host_of(&request.url).unwrap_or_else(|| self.base_host.clone());

        let started = Instant::now();
        let transport = Arc::clone(&self.transport);
        let result = self
            .executor
            .execute(
                &self.retry,
                Some(&circuit_key),
                options.cancel.as_ref(),
                || {
                    let transport = Arc::clone(&transport);
                    let request = request.clone();
                    async move {
                        match transport.send(&request).await {
                            Ok(response) => classify_response(response).map(ApiResponse::from),
                            Err(error) => Err(classify_transport_error(error)),
                        }
                    }
                },
            )
            .await;

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(response) => {
                telemetry::record_request(method.as_str(), "success", duration_ms);
                debug!(
                    method = method.as_str(),
                    path,
                    status = response.status,
                    "Request completed"
                );
            }
            Err(error) => {
                if matches!(error, CallError::CircuitOpen { .. }) {
                    telemetry::record_circuit_rejection();
                }
                telemetry::record_request(method.as_str(), error.kind(), duration_ms);
                debug!(method = method.as_str(), path, error = %error, "Request failed");
            }
        }
        result
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        options: &RequestOptions,
    ) -> TransportRequest {
        let mut headers = self.default_headers.clone();
        if let Some(credential) = &self.credential {
            headers.insert("authorization".to_string(), format!("Bearer {credential}"));
        }
        for (name, value) in &options.headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }

        TransportRequest {
            method,
            url: self.join_url(path),
            headers,
            body,
            timeout: options.timeout.unwrap_or(self.timeout),
            cancel: options.cancel.clone(),
        }
    }

    /// Absolute URLs pass through so one client can reach sibling hosts;
    /// everything else joins onto the configured base.
    fn join_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Host key the client's own circuit runs under.
    pub fn circuit_key(&self) -> &str {
        &self.base_host
    }

    pub fn is_circuit_open(&self) -> bool {
        self.executor.registry().is_open(&self.base_host)
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.executor.registry().get_state(&self.base_host)
    }

    pub fn circuit_metrics(&self) -> CircuitMetrics {
        self.executor.registry().metrics(&self.base_host)
    }

    /// Force the client's circuit back to closed. Manual recovery path.
    pub fn reset_circuit(&self) {
        self.executor.registry().reset(&self.base_host);
    }

    /// Snapshot of every circuit this client has touched, keyed by host.
    pub fn all_circuit_states(&self) -> HashMap<String, CircuitState> {
        self.executor.registry().all_states()
    }
}

/// Count every retry in the metrics facade before handing off to whatever
/// observer the caller installed.
fn with_retry_telemetry(mut policy: RetryPolicy) -> RetryPolicy {
    let user_hook = policy.on_retry.take();
    policy.on_retry = Some(Arc::new(move |attempt, error, delay| {
        telemetry::record_retry(error.kind());
        if let Some(hook) = &user_hook {
            hook(attempt, error, delay);
        }
    }));
    policy
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
}
