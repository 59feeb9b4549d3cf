//! Delivery layer for streamhook.
//!
//! A [`HookRequest`] is the fully built HTTP call for one (payload, endpoint)
//! pair. The [`Transport`] trait sends it once; [`retry::deliver`] wraps a
//! transport with the bounded retry policy and status classification.
//!
//! ## Built-in Transports
//!
//! - [`HttpTransport`]: `reqwest` client with an explicit per-attempt timeout
//!
//! ## Custom Transports
//!
//! ```rust,ignore
//! use streamhook::delivery::{HookRequest, Transport, TransportError};
//! use async_trait::async_trait;
//! use reqwest::StatusCode;
//!
//! struct Discard;
//!
//! #[async_trait]
//! impl Transport for Discard {
//!     fn name(&self) -> &str {
//!         "discard"
//!     }
//!
//!     async fn send(&self, _request: &HookRequest) -> Result<StatusCode, TransportError> {
//!         Ok(StatusCode::NO_CONTENT)
//!     }
//! }
//! ```

pub mod http;
pub mod retry;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use thiserror::Error;

use crate::endpoint::{Endpoint, HeaderSet, HttpMethod};
use crate::payload::HookPayload;

pub use http::HttpTransport;
pub use retry::{deliver, Classification, RetryPolicy};

/// Errors raised by a single transport attempt.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The attempt exceeded its timeout
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Connection, DNS or protocol failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic transport failure
    #[error("transport failed: {0}")]
    Failed(String),
}

/// Why a retryable attempt did not succeed.
#[derive(Error, Debug)]
pub enum AttemptFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("server error: {0}")]
    Server(StatusCode),
}

/// Final failure of a delivery.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The endpoint rejected the request; retrying cannot help
    #[error("client error from {url}: {status}")]
    Client {
        url: String,
        status: StatusCode,
        attempts: u32,
    },

    /// Every attempt failed with a retryable error
    #[error("delivery to {url} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        last: AttemptFailure,
    },

    /// The payload could not be encoded
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Number of HTTP attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryError::Client { attempts, .. } | DeliveryError::Exhausted { attempts, .. } => {
                *attempts
            }
            DeliveryError::Encode(_) => 0,
        }
    }
}

/// A successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub url: String,
    pub status: StatusCode,
    pub attempts: u32,
}

/// One outbound HTTP call, reused unchanged by every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct HookRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Arc<HeaderSet>,

    /// Query parameters, only used by GET requests
    pub query: Vec<(String, String)>,

    /// JSON body, absent for GET requests
    pub body: Option<Vec<u8>>,
}

impl HookRequest {
    /// Build the request for `payload` against `endpoint`.
    ///
    /// GET requests carry `event` and, when there is a stream, `stream` as
    /// query parameters and no body. Every other method sends the whole
    /// payload as a JSON body.
    pub fn new(endpoint: &Endpoint, payload: &HookPayload) -> Result<Self, serde_json::Error> {
        let (query, body) = match endpoint.method {
            HttpMethod::Get => {
                let mut query = vec![("event".to_string(), payload.event.clone())];
                if let Some(path) = payload.stream_path() {
                    query.push(("stream".to_string(), path.to_string()));
                }
                (query, None)
            }
            _ => (Vec::new(), Some(serde_json::to_vec(payload)?)),
        };

        Ok(Self {
            method: endpoint.method,
            url: endpoint.url.clone(),
            headers: endpoint.headers.clone(),
            query,
            body,
        })
    }
}

/// Sends a [`HookRequest`] once and reports the response status.
///
/// Implementations must release the response body before returning.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs (e.g. "http")
    fn name(&self) -> &str;

    async fn send(&self, request: &HookRequest) -> Result<StatusCode, TransportError>;
}
