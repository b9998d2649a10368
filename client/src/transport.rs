use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-level failure, before any classification into the call taxonomy.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Transport cancelled")]
    Cancelled,
    #[error("Transport error: {0}")]
    Other(String),
}

/// Normalized request handed to a transport engine.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    /// Absolute URL, already joined against the client base.
    pub url: String,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub cancel: Option<CancellationToken>,
}

/// Raw response from a transport. Every HTTP status comes back as `Ok`;
/// `Err` is reserved for engine-level failures.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// The single capability a remote call needs: send one request, get one
/// response. Engines plug in here (reqwest, host-provided functions, test
/// doubles).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed engine. Honours the per-attempt timeout and races every
/// await against the request's cancellation token so in-flight I/O is
/// abandoned as soon as the caller cancels.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Put => self.client.put(&request.url),
            Method::Delete => self.client.delete(&request.url),
        };

        builder = builder.timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let sent = match &request.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(TransportError::Cancelled),
                    result = builder.send() => result,
                }
            }
            None => builder.send().await,
        };
        let response = sent.map_err(|error| map_reqwest_error(&error, request.timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let collected = match &request.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(TransportError::Cancelled),
                    bytes = response.bytes() => bytes,
                }
            }
            None => response.bytes().await,
        };
        let body = collected
            .map_err(|error| map_reqwest_error(&error, request.timeout))?
            .to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(error: &reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_connect() {
        TransportError::Connection(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

pub type BoxedSendFuture =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send>>;

/// Adapter turning a plain async function into a [`Transport`], for hosts
/// that supply their own request hook instead of an HTTP engine.
pub struct TransportFn<F>
where
    F: Fn(TransportRequest) -> BoxedSendFuture + Send + Sync,
{
    func: F,
}

impl<F> TransportFn<F>
where
    F: Fn(TransportRequest) -> BoxedSendFuture + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Transport for TransportFn<F>
where
    F: Fn(TransportRequest) -> BoxedSendFuture + Send + Sync,
{
    async fn send(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        (self.func)(request.clone()).await
    }
}
