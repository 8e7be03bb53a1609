//! HTTP transport contract for the sync endpoint
//!
//! The engine talks to the server through the `Transport` trait so tests can
//! substitute a scripted double. `HttpTransport` is the reqwest-backed
//! default with a bounded request timeout.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::types::error::EngageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Asynchronous request/response transport. Authentication and retries are
/// the implementation's concern, not the engine's.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request; returns the status code and decoded JSON body (if any).
    async fn send_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(u16, Option<Value>), EngageError>;
}

/// Percent-encode a value for use in a request path or query string.
pub(crate) fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self, EngageError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| EngageError::Config(format!("Invalid base URL {}: {}", base_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| EngageError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    fn url_for(&self, path: &str) -> Result<Url, EngageError> {
        self.base_url
            .join(path)
            .map_err(|e| EngageError::Transport(format!("Invalid request path {}: {}", path, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(u16, Option<Value>), EngageError> {
        let url = self.url_for(path)?;

        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        let decoded = match response.json::<Value>().await {
            Ok(value) => Some(value),
            Err(_) => None,
        };

        Ok((status, decoded))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Transport double returning scripted responses and recording requests.
    pub struct ScriptedTransport {
        responses: Mutex<Vec<Result<(u16, Option<Value>), EngageError>>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<Result<(u16, Option<Value>), EngageError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send_request(
            &self,
            _method: HttpMethod,
            path: &str,
            _body: Option<&Value>,
        ) -> Result<(u16, Option<Value>), EngageError> {
            self.requests.lock().unwrap().push(path.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok((200, Some(serde_json::json!([]))));
            }
            responses.remove(0)
        }
    }
}
