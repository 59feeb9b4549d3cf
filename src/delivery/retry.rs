//! Bounded retry with status classification.
//!
//! ```text
//! Outcome                 | Classification | Action
//! ------------------------|----------------|-----------------------
//! transport error         | Retryable      | warn, sleep, try again
//! status >= 500           | Retryable      | warn, sleep, try again
//! 400 <= status < 500     | Terminal       | stop, fail
//! status < 400            | Success        | stop
//! ```

use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{AttemptFailure, Delivery, DeliveryError, HookRequest, Transport};

/// Default number of attempts per delivery
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default delay between attempts
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// How a response status is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Server fault, worth another attempt
    Retryable,
    /// Client fault, retrying cannot help
    Terminal,
}

impl Classification {
    pub fn of(status: StatusCode) -> Self {
        match status.as_u16() {
            500.. => Classification::Retryable,
            400..=499 => Classification::Terminal,
            _ => Classification::Success,
        }
    }
}

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Create a policy; `attempts` below 1 is raised to 1.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_DELAY)
    }
}

/// Send `request` until it succeeds, fails terminally, or attempts run out.
pub async fn deliver(
    transport: &dyn Transport,
    request: &HookRequest,
    policy: &RetryPolicy,
) -> Result<Delivery, DeliveryError> {
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            debug!(
                attempt = attempt,
                max_attempts = policy.attempts,
                url = %request.url,
                "Retrying hook request"
            );
        }

        let failure = match transport.send(request).await {
            Ok(status) => match Classification::of(status) {
                Classification::Success => {
                    info!(
                        url = %request.url,
                        status = %status,
                        attempts = attempt,
                        "Hook delivered"
                    );
                    return Ok(Delivery {
                        url: request.url.clone(),
                        status,
                        attempts: attempt,
                    });
                }
                Classification::Terminal => {
                    warn!(
                        url = %request.url,
                        status = %status,
                        attempt = attempt,
                        "Hook endpoint returned client error, not retrying"
                    );
                    return Err(DeliveryError::Client {
                        url: request.url.clone(),
                        status,
                        attempts: attempt,
                    });
                }
                Classification::Retryable => {
                    warn!(
                        url = %request.url,
                        status = %status,
                        attempt = attempt,
                        "Hook endpoint returned server error"
                    );
                    AttemptFailure::Server(status)
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    url = %request.url,
                    transport = transport.name(),
                    attempt = attempt,
                    "Hook request failed"
                );
                AttemptFailure::Transport(e)
            }
        };

        if attempt >= policy.attempts {
            return Err(DeliveryError::Exhausted {
                url: request.url.clone(),
                attempts: attempt,
                last: failure,
            });
        }

        tokio::time::sleep(policy.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::TransportError;
    use crate::endpoint::{HeaderSet, HttpMethod};
    use crate::testing::{Reply, ScriptedTransport};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn request() -> HookRequest {
        HookRequest {
            method: HttpMethod::Post,
            url: "http://host/hook".to_string(),
            headers: Arc::new(HeaderSet::new()),
            query: Vec::new(),
            body: Some(b"{}".to_vec()),
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(Classification::of(StatusCode::OK), Classification::Success);
        assert_eq!(Classification::of(StatusCode::FOUND), Classification::Success);
        assert_eq!(Classification::of(StatusCode::BAD_REQUEST), Classification::Terminal);
        assert_eq!(Classification::of(StatusCode::NOT_FOUND), Classification::Terminal);
        assert_eq!(
            Classification::of(StatusCode::INTERNAL_SERVER_ERROR),
            Classification::Retryable
        );
        assert_eq!(
            Classification::of(StatusCode::from_u16(599).unwrap()),
            Classification::Retryable
        );
    }

    #[test]
    fn test_policy_floor() {
        assert_eq!(RetryPolicy::new(0, DEFAULT_DELAY).attempts(), 1);
        assert_eq!(RetryPolicy::default().attempts(), 3);
        assert_eq!(RetryPolicy::default().delay(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_then_success() {
        let transport = ScriptedTransport::new(vec![
            Reply::Error("connection refused"),
            Reply::Error("connection reset"),
            Reply::Status(200),
        ]);

        let started = Instant::now();
        let delivery = deliver(&transport, &request(), &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(delivery.attempts, 3);
        assert_eq!(delivery.status, StatusCode::OK);
        assert_eq!(transport.request_count(), 3);
        // two fixed delays between three attempts
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Reply::Status(404)]);

        let err = deliver(&transport, &request(), &RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeliveryError::Client { status: StatusCode::NOT_FOUND, attempts: 1, .. }
        ));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_exhaust_attempts() {
        let transport = ScriptedTransport::repeating(Reply::Status(503));
        let policy = RetryPolicy::new(5, Duration::from_millis(10));

        let err = deliver(&transport, &request(), &policy).await.unwrap_err();

        assert_eq!(err.attempts(), 5);
        assert!(matches!(
            err,
            DeliveryError::Exhausted {
                last: AttemptFailure::Server(StatusCode::SERVICE_UNAVAILABLE),
                ..
            }
        ));
        assert_eq!(transport.request_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_then_client_error() {
        let transport = ScriptedTransport::new(vec![Reply::Status(502), Reply::Status(401)]);

        let err = deliver(&transport, &request(), &RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Client { attempts: 2, .. }));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy() {
        let transport = ScriptedTransport::repeating(Reply::Error("timeout"));

        let err = deliver(&transport, &request(), &RetryPolicy::new(1, DEFAULT_DELAY))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeliveryError::Exhausted {
                attempts: 1,
                last: AttemptFailure::Transport(TransportError::Failed(_)),
                ..
            }
        ));
    }
}
