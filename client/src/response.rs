use std::borrow::Cow;
use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::transport::TransportResponse;

/// Successful response handed back to callers.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserialize the body into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as loose JSON, for callers that only poke at a field or two.
    pub fn data(&self) -> Result<serde_json::Value, serde_json::Error> {
        self.json()
    }
}

impl From<TransportResponse> for ApiResponse {
    fn from(response: TransportResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }
}
