//! Behavioural tests over the scripted transport: exact invocation counts,
//! circuit transitions and cancellation, with no network involved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use client::{
    ApiClient, ApiClientConfig, CallError, CircuitBreakerConfig, CircuitState, RequestOptions,
    RetryPolicy,
};
use serde_json::json;
use testing::{MockTransport, ScriptedOutcome};
use tokio_util::sync::CancellationToken;

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        jitter_factor: 0.0,
        ..Default::default()
    }
}

fn client_over(mock: &Arc<MockTransport>, config: ApiClientConfig) -> ApiClient {
    ApiClient::with_transport(config, mock.clone()).unwrap()
}

#[tokio::test]
async fn test_get_parses_json_body() {
    let mock = MockTransport::always(ScriptedOutcome::ok_json(json!({"success": true})));
    let client = client_over(
        &mock,
        ApiClientConfig {
            retry: fast_retry(3),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    let response = client.get("/status", RequestOptions::default()).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.data().unwrap(), json!({"success": true}));
    assert_eq!(mock.calls(), 1);
    assert_eq!(client.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_rate_limited_then_success_replays() {
    let mock = MockTransport::sequence(vec![
        ScriptedOutcome::rate_limited(0),
        ScriptedOutcome::ok_json(json!({"success": true})),
    ]);
    // Base backoff of 30s would hang the test; the retry-after of zero
    // seconds must take precedence.
    let client = client_over(
        &mock,
        ApiClientConfig {
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_secs(30),
                jitter_factor: 0.0,
                ..Default::default()
            },
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    let started = Instant::now();
    let response = client.get("/reports", RequestOptions::default()).await.unwrap();

    assert_eq!(response.data().unwrap(), json!({"success": true}));
    assert_eq!(mock.calls(), 2);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let mock = MockTransport::always(ScriptedOutcome::status_with_body(401, "expired token"));
    let client = client_over(
        &mock,
        ApiClientConfig {
            retry: fast_retry(3),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    let result = client.get("/status", RequestOptions::default()).await;

    assert!(matches!(result, Err(CallError::Authentication(_))));
    assert_eq!(mock.calls(), 1);
    // The one failed attempt still counts against the circuit.
    assert_eq!(client.circuit_metrics().consecutive_failures, 1);
}

#[tokio::test]
async fn test_invalid_request_is_not_retried() {
    let mock = MockTransport::always(ScriptedOutcome::status_with_body(404, "no such note"));
    let client = client_over(
        &mock,
        ApiClientConfig {
            retry: fast_retry(5),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    let result = client.get("/notes/9000", RequestOptions::default()).await;

    assert!(matches!(
        result,
        Err(CallError::InvalidRequest { status: 404, .. })
    ));
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn test_server_errors_exhaust_retry_budget() {
    let mock = MockTransport::always(ScriptedOutcome::status(503));
    let client = client_over(
        &mock,
        ApiClientConfig {
            retry: fast_retry(2),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    let result = client.get("/status", RequestOptions::default()).await;

    assert!(matches!(result, Err(CallError::ServerError(503))));
    assert_eq!(mock.calls(), 3);
    assert_eq!(client.circuit_metrics().total_requests, 3);
}

#[tokio::test]
async fn test_network_errors_are_retryable() {
    let mock = MockTransport::sequence(vec![
        ScriptedOutcome::network_error("connection refused"),
        ScriptedOutcome::timeout(Duration::from_millis(100)),
        ScriptedOutcome::ok_json(json!({"success": true})),
    ]);
    let client = client_over(
        &mock,
        ApiClientConfig {
            retry: fast_retry(3),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    let response = client.get("/status", RequestOptions::default()).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(mock.calls(), 3);
}

#[tokio::test]
async fn test_circuit_opens_and_fast_fails() {
    let mock = MockTransport::always(ScriptedOutcome::status(500));
    let client = client_over(
        &mock,
        ApiClientConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
            retry: fast_retry(1),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    let first = client.get("/status", RequestOptions::default()).await;
    assert!(matches!(first, Err(CallError::ServerError(500))));
    assert_eq!(mock.calls(), 2);
    assert!(client.is_circuit_open());

    // While open, the transport must not be touched at all.
    let rejected = client.get("/status", RequestOptions::default()).await;
    assert!(matches!(rejected, Err(CallError::CircuitOpen { .. })));
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_circuit_recovers_after_open_timeout() {
    let mock = MockTransport::sequence(vec![
        ScriptedOutcome::status(500),
        ScriptedOutcome::ok_json(json!({"success": true})),
    ]);
    let client = client_over(
        &mock,
        ApiClientConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                open_timeout: Duration::from_millis(50),
            },
            retry: fast_retry(0),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    let failed = client.get("/status", RequestOptions::default()).await;
    assert!(failed.is_err());
    assert!(client.is_circuit_open());

    let rejected = client.get("/status", RequestOptions::default()).await;
    assert!(matches!(rejected, Err(CallError::CircuitOpen { .. })));
    assert_eq!(mock.calls(), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;

    let probed = client.get("/status", RequestOptions::default()).await.unwrap();
    assert_eq!(probed.status, 200);
    assert_eq!(client.circuit_state(), CircuitState::Closed);
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_reset_circuit_reopens_traffic() {
    let mock = MockTransport::sequence(vec![
        ScriptedOutcome::status(500),
        ScriptedOutcome::ok_json(json!({"success": true})),
    ]);
    let client = client_over(
        &mock,
        ApiClientConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            retry: fast_retry(0),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    let _ = client.get("/status", RequestOptions::default()).await;
    assert!(client.is_circuit_open());

    client.reset_circuit();
    assert!(!client.is_circuit_open());
    assert_eq!(client.circuit_metrics().consecutive_failures, 0);

    let response = client.get("/status", RequestOptions::default()).await.unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_bearer_credential_is_attached() {
    let mock = MockTransport::always(ScriptedOutcome::ok_json(json!({"success": true})));
    let client = client_over(
        &mock,
        ApiClientConfig {
            credential: Some("secret-token".to_string()),
            retry: fast_retry(0),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    client.get("/status", RequestOptions::default()).await.unwrap();

    let request = mock.last_request().unwrap();
    assert_eq!(
        request.headers.get("authorization").map(String::as_str),
        Some("Bearer secret-token")
    );
}

#[tokio::test]
async fn test_per_call_headers_override_defaults() {
    let mock = MockTransport::always(ScriptedOutcome::ok_json(json!({"success": true})));
    let client = client_over(
        &mock,
        ApiClientConfig {
            default_headers: HashMap::from([("X-Trace".to_string(), "base".to_string())]),
            retry: fast_retry(0),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    let options = RequestOptions {
        headers: HashMap::from([("x-trace".to_string(), "call".to_string())]),
        ..Default::default()
    };
    client.get("/status", options).await.unwrap();

    let request = mock.last_request().unwrap();
    assert_eq!(
        request.headers.get("x-trace").map(String::as_str),
        Some("call")
    );
}

#[tokio::test]
async fn test_post_body_reaches_transport() {
    let mock = MockTransport::always(ScriptedOutcome::ok_json(json!({"id": 1})));
    let client = client_over(
        &mock,
        ApiClientConfig {
            retry: fast_retry(0),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    client
        .post("/notes", json!({"title": "standup"}), RequestOptions::default())
        .await
        .unwrap();

    let request = mock.last_request().unwrap();
    assert_eq!(request.body, Some(json!({"title": "standup"})));
    assert_eq!(request.url, "https://api.example.com/notes");
}

#[tokio::test]
async fn test_circuits_are_keyed_per_host() {
    let mock = MockTransport::always(ScriptedOutcome::status(500));
    let client = client_over(
        &mock,
        ApiClientConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            retry: fast_retry(0),
            ..ApiClientConfig::new("https://a.example.com")
        },
    );

    let result = client
        .get("https://b.example.com/x", RequestOptions::default())
        .await;
    assert!(matches!(result, Err(CallError::ServerError(500))));

    // The sibling host's circuit tripped; the client's own host is fine.
    assert!(!client.is_circuit_open());
    let states = client.all_circuit_states();
    assert_eq!(states.get("b.example.com"), Some(&CircuitState::Open));

    let rejected = client
        .get("https://b.example.com/x", RequestOptions::default())
        .await;
    assert!(matches!(
        rejected,
        Err(CallError::CircuitOpen { ref key, .. }) if key == "b.example.com"
    ));
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_the_call() {
    let mock = MockTransport::always(ScriptedOutcome::status(503));
    let client = Arc::new(client_over(
        &mock,
        ApiClientConfig {
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_secs(30),
                jitter_factor: 0.0,
                ..Default::default()
            },
            ..ApiClientConfig::new("https://api.example.com")
        },
    ));

    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let client = client.clone();
        let options = RequestOptions {
            cancel: Some(token.clone()),
            ..Default::default()
        };
        async move { client.get("/status", options).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(CallError::Cancelled)));
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn test_cancel_aborts_inflight_request() {
    let mock = MockTransport::always(ScriptedOutcome::Hang);
    let client = Arc::new(client_over(
        &mock,
        ApiClientConfig {
            retry: fast_retry(3),
            ..ApiClientConfig::new("https://api.example.com")
        },
    ));

    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let client = client.clone();
        let options = RequestOptions {
            cancel: Some(token.clone()),
            ..Default::default()
        };
        async move { client.get("/status", options).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(CallError::Cancelled)));
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn test_precancelled_token_never_touches_transport() {
    let mock = MockTransport::always(ScriptedOutcome::ok_json(json!({"success": true})));
    let client = client_over(
        &mock,
        ApiClientConfig {
            retry: fast_retry(3),
            ..ApiClientConfig::new("https://api.example.com")
        },
    );

    let token = CancellationToken::new();
    token.cancel();
    let options = RequestOptions {
        cancel: Some(token),
        ..Default::default()
    };

    let result = client.get("/status", options).await;
    assert!(matches!(result, Err(CallError::Cancelled)));
    assert_eq!(mock.calls(), 0);
    assert_eq!(client.circuit_metrics().total_requests, 0);
}
