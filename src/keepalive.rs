//! Keep-alive Loop - periodic liveness pings to remote endpoints.
//!
//! When an interval is configured and an endpoint is registered for
//! `keepalive` or `*`, a single background task sends a `keepalive` event to
//! each of them, sleeps for the interval, and repeats until shutdown.

use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::endpoint::{Endpoint, EndpointTable};
use crate::event::HookEvent;
use crate::payload::PayloadBuilder;
use crate::shutdown::ShutdownSignal;

/// Keep-alive loop configuration.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    interval: Duration,
    targets: Vec<Arc<Endpoint>>,
}

impl KeepAlive {
    pub fn new(interval: Duration, targets: Vec<Arc<Endpoint>>) -> Self {
        Self { interval, targets }
    }

    /// Target the `keepalive` and `*` endpoints of `table`.
    pub fn from_table(interval: Duration, table: &EndpointTable) -> Self {
        Self::new(interval, table.keepalive_targets())
    }

    /// The loop only runs with a positive interval and at least one target.
    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero() && !self.targets.is_empty()
    }

    /// Start the loop; returns `None` when keep-alive is disabled.
    pub fn spawn(
        self,
        builder: PayloadBuilder,
        dispatcher: Dispatcher,
        shutdown: &ShutdownSignal,
    ) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            debug!(
                interval_ms = self.interval.as_millis() as u64,
                targets = self.targets.len(),
                "Keep-alive disabled"
            );
            return None;
        }

        info!(
            interval_ms = self.interval.as_millis() as u64,
            targets = self.targets.len(),
            "Starting keep-alive loop"
        );

        let receiver = shutdown.subscribe();
        Some(tokio::spawn(self.run(builder, dispatcher, receiver)))
    }

    async fn run(
        self,
        builder: PayloadBuilder,
        dispatcher: Dispatcher,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            for endpoint in &self.targets {
                let payload = builder.build(HookEvent::KeepAlive.as_str(), None, Map::new());
                match dispatcher.dispatch(endpoint.clone(), payload) {
                    Ok(_) => {}
                    Err(DispatchError::ShuttingDown) => {
                        info!("Dispatcher closed, keep-alive loop stopped");
                        return;
                    }
                    // Dropped ping; the next tick tries again
                    Err(DispatchError::Saturated(_)) => {}
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => {
                    info!("Keep-alive loop stopped");
                    return;
                }
            }
        }
    }
}
