//! Dispatcher - managed fire-and-forget delivery.
//!
//! Every (event, endpoint) pair becomes one task on the runtime the
//! dispatcher was created in. Tasks run independently of each other and of
//! the caller; their outcome is logged and counted, never propagated back.
//!
//! # Architecture
//!
//! ```text
//! Router / KeepAlive
//!     │ dispatch(endpoint, payload)
//!     ▼
//! ┌─────────────────────────────────────┐
//! │           DISPATCHER                │
//! │                                     │
//! │  in_flight += 1, spawn task         │
//! │  task: acquire permit (bounded)     │
//! │        deliver with retry policy    │
//! │        record stats, in_flight -= 1 │
//! └─────────────────────────────────────┘
//!     │
//!     ▼
//!  Transport -> network
//! ```
//!
//! `max_in_flight` bounds how many deliveries run at once; the rest wait for
//! a slot. `max_pending` bounds how many are outstanding in total, so a
//! stalled endpoint cannot pile up tasks without limit: past it, dispatches
//! are refused with [`DispatchError::Saturated`] and counted as dropped.
//!
//! [`Dispatcher::shutdown`] stops accepting work and waits for running
//! deliveries to drain.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::delivery::{deliver, Delivery, DeliveryError, HookRequest, RetryPolicy, Transport};
use crate::endpoint::Endpoint;
use crate::payload::HookPayload;

/// Errors returned when a dispatch cannot be started.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// Too many deliveries outstanding
    #[error("dispatch backlog full ({0} pending)")]
    Saturated(usize),
}

/// Outcome of one spawned delivery.
pub type DeliveryHandle = JoinHandle<Result<Delivery, DeliveryError>>;

/// Delivery counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    attempts: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub dispatched: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
    pub attempts: u64,
    pub in_flight: usize,
}

struct Inner {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    permits: Semaphore,
    max_pending: usize,
    runtime: Handle,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
    stats: DispatchStats,
}

impl Inner {
    fn record(&self, result: &Result<Delivery, DeliveryError>) {
        match result {
            Ok(delivery) => {
                self.stats
                    .attempts
                    .fetch_add(delivery.attempts as u64, Ordering::Relaxed);
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats
                    .attempts
                    .fetch_add(e.attempts() as u64, Ordering::Relaxed);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, attempts = e.attempts(), "Hook delivery failed");
            }
        }
    }
}

/// Decrements the in-flight count when a dispatch finishes or is rejected.
struct InFlight(Arc<Inner>);

impl InFlight {
    fn enter(inner: &Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(inner.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

/// Spawns and tracks deliveries.
///
/// Cheap to clone; clones share the same pool, counters and shutdown state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher running deliveries on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        limits: &DispatcherConfig,
    ) -> Self {
        let max_in_flight = limits.max_in_flight.max(1);

        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                permits: Semaphore::new(max_in_flight),
                max_pending: limits.max_pending.max(max_in_flight),
                runtime: Handle::current(),
                accepting: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
                stats: DispatchStats::default(),
            }),
        }
    }

    /// Start delivering `payload` to `endpoint` in the background.
    ///
    /// Returns immediately. The handle may be awaited for the outcome or
    /// dropped; dropping it does not cancel the delivery.
    pub fn dispatch(
        &self,
        endpoint: Arc<Endpoint>,
        payload: HookPayload,
    ) -> Result<DeliveryHandle, DispatchError> {
        let guard = InFlight::enter(&self.inner);

        if !self.inner.accepting.load(Ordering::SeqCst) {
            self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                event = %payload.event,
                url = %endpoint.url,
                "Dispatcher shutting down, hook dropped"
            );
            return Err(DispatchError::ShuttingDown);
        }

        // The guard already counts this dispatch
        let pending = self.inner.in_flight.load(Ordering::SeqCst);
        if pending > self.inner.max_pending {
            self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                event = %payload.event,
                url = %endpoint.url,
                pending = pending - 1,
                "Dispatch backlog full, hook dropped"
            );
            return Err(DispatchError::Saturated(pending - 1));
        }

        self.inner.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        let span = info_span!(
            "delivery",
            delivery_id = %Uuid::new_v4(),
            event = %payload.event,
            url = %endpoint.url,
        );

        let inner = self.inner.clone();
        let task = async move {
            let _guard = guard;
            // The semaphore is never closed
            let _permit = inner.permits.acquire().await.ok();

            let result = match HookRequest::new(&endpoint, &payload) {
                Ok(request) => deliver(inner.transport.as_ref(), &request, &inner.policy).await,
                Err(e) => Err(DeliveryError::from(e)),
            };

            inner.record(&result);
            result
        };

        Ok(self.inner.runtime.spawn(task.instrument(span)))
    }

    /// Number of deliveries spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StatsSnapshot {
        let stats = &self.inner.stats;
        StatsSnapshot {
            dispatched: stats.dispatched.load(Ordering::Relaxed),
            delivered: stats.delivered.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            attempts: stats.attempts.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }

    /// Stop accepting dispatches and wait for running ones to finish.
    ///
    /// Returns `true` if every delivery finished within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.accepting.store(false, Ordering::SeqCst);

        let drain = async {
            loop {
                let notified = self.inner.drained.notified();
                if self.in_flight() == 0 {
                    break;
                }
                notified.await;
            }
        };

        debug!(in_flight = self.in_flight(), "Draining dispatcher");

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => {
                info!(stats = ?self.stats(), "Dispatcher drained");
                true
            }
            Err(_) => {
                warn!(
                    in_flight = self.in_flight(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Dispatcher drain timed out, abandoning deliveries"
                );
                false
            }
        }
    }
}
