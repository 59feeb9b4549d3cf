//! HTTP transport - sends hook requests with `reqwest`.
//!
//! # Example
//!
//! ```rust,ignore
//! use streamhook::delivery::HttpTransport;
//! use std::time::Duration;
//!
//! let transport = HttpTransport::new().with_timeout(Duration::from_secs(5));
//! ```

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::{HookRequest, Transport, TransportError};

/// Default timeout for a single attempt
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A transport backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// HTTP client (reused for connection pooling)
    client: Client,

    /// Per-attempt timeout
    timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set custom per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build(&self, request: &HookRequest) -> Result<reqwest::Request, TransportError> {
        let mut builder = self
            .client
            .request(request.method.into(), &request.url)
            .timeout(self.timeout);

        for (name, value) in request.headers.iter() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Failed(format!("invalid header name: {}", e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Failed(format!("invalid header value: {}", e)))?;
            builder = builder.header(name, value);
        }

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        Ok(builder.build()?)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &HookRequest) -> Result<StatusCode, TransportError> {
        let http_request = self.build(request)?;

        debug!(
            method = %request.method,
            url = %http_request.url(),
            "Sending hook request"
        );

        let response = self.client.execute(http_request).await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout.as_millis() as u64)
            } else {
                TransportError::Http(e)
            }
        })?;

        let status = response.status();

        // Drain the body so the connection returns to the pool
        if let Err(e) = response.bytes().await {
            debug!(error = %e, status = %status, "Failed to drain response body");
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{HeaderSet, HttpMethod};
    use std::sync::Arc;

    fn request(method: HttpMethod, body: Option<Vec<u8>>) -> HookRequest {
        HookRequest {
            method,
            url: "http://127.0.0.1:9/hook".to_string(),
            headers: Arc::new(HeaderSet::from([(
                "Authorization".to_string(),
                "Bearer t".to_string(),
            )])),
            query: vec![
                ("event".to_string(), "publish".to_string()),
                ("stream".to_string(), "/live/test".to_string()),
            ],
            body,
        }
    }

    #[test]
    fn test_transport_builder() {
        let transport = HttpTransport::new().with_timeout(Duration::from_secs(3));
        assert_eq!(transport.timeout(), Duration::from_secs(3));
        assert_eq!(transport.name(), "http");
    }

    #[test]
    fn test_build_get_request() {
        let transport = HttpTransport::new();
        let built = transport.build(&request(HttpMethod::Get, None)).unwrap();

        assert_eq!(built.method(), reqwest::Method::GET);
        assert_eq!(
            built.url().as_str(),
            "http://127.0.0.1:9/hook?event=publish&stream=%2Flive%2Ftest"
        );
        assert_eq!(built.headers()["authorization"], "Bearer t");
        assert!(built.body().is_none());
        assert_eq!(built.timeout(), Some(&DEFAULT_TIMEOUT));
    }

    #[test]
    fn test_build_post_request() {
        let transport = HttpTransport::new();
        let mut req = request(HttpMethod::Post, Some(b"{}".to_vec()));
        req.query.clear();

        let built = transport.build(&req).unwrap();
        assert_eq!(built.method(), reqwest::Method::POST);
        assert_eq!(built.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(built.body().and_then(|b| b.as_bytes()), Some(&b"{}"[..]));
    }
}
