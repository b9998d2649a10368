use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use client::transport::{Transport, TransportError, TransportRequest, TransportResponse};
use parking_lot::Mutex;

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Response(TransportResponse),
    Error(TransportError),
    /// Never completes on its own; resolves `Cancelled` once the request's
    /// token fires. Lets tests exercise in-flight cancellation.
    Hang,
}

impl ScriptedOutcome {
    /// 200 with a JSON body.
    pub fn ok_json(value: serde_json::Value) -> Self {
        ScriptedOutcome::Response(TransportResponse {
            status: 200,
            headers: HashMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )]),
            body: serde_json::to_vec(&value).unwrap_or_default(),
        })
    }

    /// Bare status with an empty body.
    pub fn status(code: u16) -> Self {
        ScriptedOutcome::Response(TransportResponse {
            status: code,
            headers: HashMap::new(),
            body: Vec::new(),
        })
    }

    pub fn status_with_body(code: u16, body: &str) -> Self {
        ScriptedOutcome::Response(TransportResponse {
            status: code,
            headers: HashMap::new(),
            body: body.as_bytes().to_vec(),
        })
    }

    /// 429 carrying a whole-second `retry-after` header.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        ScriptedOutcome::Response(TransportResponse {
            status: 429,
            headers: HashMap::from([(
                "retry-after".to_string(),
                retry_after_secs.to_string(),
            )]),
            body: Vec::new(),
        })
    }

    pub fn network_error(message: &str) -> Self {
        ScriptedOutcome::Error(TransportError::Connection(message.to_string()))
    }

    pub fn timeout(after: Duration) -> Self {
        ScriptedOutcome::Error(TransportError::Timeout(after))
    }

    async fn run(self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        match self {
            ScriptedOutcome::Response(response) => Ok(response),
            ScriptedOutcome::Error(error) => Err(error),
            ScriptedOutcome::Hang => match &request.cancel {
                Some(token) => {
                    token.cancelled().await;
                    Err(TransportError::Cancelled)
                }
                None => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(TransportError::Other("hung request never cancelled".into()))
                }
            },
        }
    }
}

/// Transport whose outcomes are scripted in order. Once the script is down
/// to its last entry, that entry repeats for every further call, so "always
/// fails" and "fails twice then succeeds" are both one-liners.
pub struct MockTransport {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn sequence(outcomes: Vec<ScriptedOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn always(outcome: ScriptedOutcome) -> Arc<Self> {
        Self::sequence(vec![outcome])
    }

    /// How many times `send` was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Copies of every request seen, in order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<TransportRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let outcome = {
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        };

        match outcome {
            Some(outcome) => outcome.run(request).await,
            None => Err(TransportError::Other("mock transport script is empty".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use client::transport::Method;

    use super::*;

    fn request() -> TransportRequest {
        TransportRequest {
            method: Method::Get,
            url: "https://api.example.com/status".to_string(),
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_secs(1),
            cancel: None,
        }
    }

    #[tokio::test]
    async fn test_sequence_then_repeats_last() {
        let mock = MockTransport::sequence(vec![
            ScriptedOutcome::status(500),
            ScriptedOutcome::ok_json(serde_json::json!({"success": true})),
        ]);

        let first = mock.send(&request()).await.unwrap();
        assert_eq!(first.status, 500);

        let second = mock.send(&request()).await.unwrap();
        assert_eq!(second.status, 200);

        // The final entry keeps answering.
        let third = mock.send(&request()).await.unwrap();
        assert_eq!(third.status, 200);

        assert_eq!(mock.calls(), 3);
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_errors_surface() {
        let mock = MockTransport::always(ScriptedOutcome::network_error("refused"));

        let result = mock.send(&request()).await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }

    #[tokio::test]
    async fn test_rate_limited_outcome_sets_header() {
        let mock = MockTransport::always(ScriptedOutcome::rate_limited(7));

        let response = mock.send(&request()).await.unwrap();
        assert_eq!(response.status, 429);
        assert_eq!(response.header("retry-after"), Some("7"));
    }
}
