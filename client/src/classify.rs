use std::time::Duration;

use resilience::CallError;

use crate::transport::{TransportError, TransportResponse};

const BODY_SNIPPET_LIMIT: usize = 200;

/// Sort an HTTP response into the normalized taxonomy. Any 2xx passes
/// through; every other status maps to exactly one error variant.
pub fn classify_response(response: TransportResponse) -> Result<TransportResponse, CallError> {
    match response.status {
        200..=299 => Ok(response),
        401 | 403 => Err(CallError::Authentication(body_snippet(&response))),
        429 => Err(CallError::RateLimited {
            retry_after: parse_retry_after(&response),
        }),
        400..=499 => Err(CallError::InvalidRequest {
            status: response.status,
            message: body_snippet(&response),
        }),
        500..=599 => Err(CallError::ServerError(response.status)),
        status => Err(CallError::Unknown(format!("unexpected status {status}"))),
    }
}

pub fn classify_transport_error(error: TransportError) -> CallError {
    match error {
        TransportError::Timeout(timeout) => {
            CallError::Network(format!("request timed out after {timeout:?}"))
        }
        TransportError::Connection(message) => CallError::Network(message),
        TransportError::Cancelled => CallError::Cancelled,
        TransportError::Other(message) => CallError::Unknown(message),
    }
}

/// Whole-second `retry-after` values only; anything else (HTTP dates,
/// garbage) is treated as absent and the backoff schedule applies.
fn parse_retry_after(response: &TransportResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn body_snippet(response: &TransportResponse) -> String {
    let text = String::from_utf8_lossy(&response.body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return format!("status {}", response.status);
    }

    let mut snippet: String = trimmed.chars().take(BODY_SNIPPET_LIMIT).collect();
    if trimmed.chars().count() > BODY_SNIPPET_LIMIT {
        snippet.push_str("...");
    }
    snippet
}
