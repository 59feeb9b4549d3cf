//! Event Router - fans engine events out to their endpoints.
//!
//! The [`Router`] looks up the endpoint registered for an event's exact name
//! and the wildcard endpoint, and dispatches one independent delivery to
//! each of them.
//!
//! # Matching
//!
//! ```text
//! Registered       | "publish" fires
//! -----------------|----------------------------
//! publish          | publish endpoint
//! *                | wildcard endpoint
//! publish + *      | both, independently, unordered
//! (neither)        | nothing
//! ```
//!
//! # Architecture
//!
//! ```text
//! EngineEvent::Publish { stream: "/live/a" }
//!     │
//!     ▼
//! ┌─────────────────────────────────────┐
//! │            ROUTER                   │
//! │                                     │
//! │  1. Exact: endpoints["publish"]? YES│
//! │  2. Wildcard: endpoints["*"]? YES   │
//! │  3. Build payload per endpoint,     │
//! │     hand each to the Dispatcher     │
//! └─────────────────────────────────────┘
//! ```

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dispatcher::{DeliveryHandle, Dispatcher};
use crate::endpoint::EndpointTable;
use crate::event::{EngineEvent, Stream};
use crate::payload::PayloadBuilder;

/// Result of routing one event.
#[derive(Debug)]
pub struct RouteResult {
    /// Event name that was routed
    pub event: String,

    /// Names the fired endpoints are registered under (`publish`, `*`)
    pub matched: Vec<String>,

    /// Handles of the spawned deliveries.
    ///
    /// Dropping them does not cancel the deliveries.
    pub deliveries: Vec<DeliveryHandle>,

    /// Deliveries refused because the dispatcher is shutting down
    pub dropped: usize,
}

impl RouteResult {
    /// Number of deliveries started
    pub fn dispatched(&self) -> usize {
        self.deliveries.len()
    }
}

/// Routes engine events to the endpoint table.
///
/// # Thread Safety
///
/// The endpoint table is read-only, so a `Router` can be shared behind an
/// `Arc` and called from any thread.
#[derive(Clone)]
pub struct Router {
    endpoints: Arc<EndpointTable>,
    builder: PayloadBuilder,
    dispatcher: Dispatcher,
}

impl Router {
    pub fn new(
        endpoints: Arc<EndpointTable>,
        builder: PayloadBuilder,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            endpoints,
            builder,
            dispatcher,
        }
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    /// Check if any endpoint, exact or wildcard, receives `event`.
    pub fn has_endpoints(&self, event: &str) -> bool {
        !self.endpoints.matching(event).is_empty()
    }

    /// Route a host-engine notification.
    pub fn route(&self, event: &EngineEvent) -> RouteResult {
        self.fire(
            event.hook_event().as_str(),
            Some(event.stream()),
            event.extra(),
        )
    }

    /// Fire `event` at its exact and wildcard endpoints.
    ///
    /// Each endpoint gets its own payload and its own delivery task; this
    /// never waits on the network.
    pub fn fire(
        &self,
        event: &str,
        stream: Option<&Stream>,
        extra: Map<String, Value>,
    ) -> RouteResult {
        let matched = self.endpoints.matching(event);

        let mut result = RouteResult {
            event: event.to_string(),
            matched: Vec::with_capacity(matched.len()),
            deliveries: Vec::with_capacity(matched.len()),
            dropped: 0,
        };

        if matched.is_empty() {
            debug!(event = %event, "No endpoint registered for event");
            return result;
        }

        for (name, endpoint) in matched {
            let payload = self.builder.build(event, stream, extra.clone());

            match self.dispatcher.dispatch(endpoint, payload) {
                Ok(handle) => {
                    result.matched.push(name.to_string());
                    result.deliveries.push(handle);
                }
                Err(e) => {
                    warn!(event = %event, endpoint = %name, error = %e, "Hook not dispatched");
                    result.dropped += 1;
                }
            }
        }

        debug!(
            event = %event,
            stream = ?stream.map(|s| s.path.as_str()),
            matched = ?result.matched,
            "Event routed"
        );

        result
    }
}
