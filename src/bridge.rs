//! HTTP bridge between the host engine and the hook service.
//!
//! The engine posts its lifecycle events here; each one is routed through
//! the [`HookService`] and acknowledged immediately with `202 Accepted`, or
//! `503 Service Unavailable` when every matching delivery was dropped.
//!
//! ```text
//! GET  /health          liveness
//! GET  /metrics         uptime and delivery counters
//! POST /api/v1/events   EngineEvent JSON (bearer auth when api_key is set)
//! ```

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::event::EngineEvent;
use crate::service::HookService;

/// Shared state of the bridge server.
pub struct BridgeState {
    service: Arc<HookService>,
    api_key: Option<String>,
    events_received: AtomicU64,
    start_time: Instant,
}

impl BridgeState {
    pub fn new(service: Arc<HookService>, api_key: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            service,
            api_key,
            events_received: AtomicU64::new(0),
            start_time: Instant::now(),
        })
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Response returned when an engine event is accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct EventResponse {
    /// Hook event name the engine event was reported as
    pub event: String,

    /// Endpoint names the event was dispatched to
    pub matched: Vec<String>,

    /// Deliveries refused by the dispatcher (shutting down or backlog full)
    pub dropped: usize,

    pub status: String,
}

/// Build the bridge application.
pub fn app(state: Arc<BridgeState>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/api/v1/events", post(emit_event))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<Arc<BridgeState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // Skip auth for health check and metrics
    let path = req.uri().path();
    if path == "/health" || path == "/metrics" {
        return Ok(next.run(req).await);
    }

    let Some(api_key) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok());

    match auth_header.and_then(|value| value.strip_prefix("Bearer ")) {
        Some(token) if token == api_key => Ok(next.run(req).await),
        Some(_) => {
            warn!("Invalid API Key attempt");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn health_check(State(state): State<Arc<BridgeState>>) -> Json<Value> {
    let accepting = !state.service.shutdown_signal().is_shutdown();
    Json(json!({
        "status": if accepting { "ok" } else { "shutting_down" },
        "endpoints": state.service.router().endpoints().len(),
    }))
}

/// Get metrics endpoint - returns server metrics as JSON
async fn get_metrics(State(state): State<Arc<BridgeState>>) -> Json<Value> {
    let uptime = state.uptime_seconds();
    let events_received = state.events_received.load(Ordering::Relaxed);

    // Format uptime as human-readable
    let uptime_str = if uptime < 60 {
        format!("{}s", uptime)
    } else if uptime < 3600 {
        format!("{}m {}s", uptime / 60, uptime % 60)
    } else {
        format!("{}h {}m {}s", uptime / 3600, (uptime % 3600) / 60, uptime % 60)
    };

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "uptime": uptime_str,
        "events": {
            "received": events_received
        },
        "deliveries": state.service.stats(),
        "keepalive": state.service.keepalive_running(),
    }))
}

async fn emit_event(
    State(state): State<Arc<BridgeState>>,
    Json(event): Json<EngineEvent>,
) -> (StatusCode, Json<EventResponse>) {
    debug!(event = ?event, "Received engine event");
    state.events_received.fetch_add(1, Ordering::Relaxed);

    let result = state.service.handle(&event);

    let (code, status) = if result.dispatched() == 0 && result.dropped > 0 {
        warn!(
            event = %result.event,
            stream = %event.stream().path,
            dropped = result.dropped,
            "Engine event dropped"
        );
        (StatusCode::SERVICE_UNAVAILABLE, "dropped")
    } else {
        info!(
            event = %result.event,
            stream = %event.stream().path,
            dispatched = result.dispatched(),
            dropped = result.dropped,
            "Engine event accepted"
        );
        (StatusCode::ACCEPTED, "accepted")
    };

    (
        code,
        Json(EventResponse {
            event: result.event,
            matched: result.matched,
            dropped: result.dropped,
            status: status.to_string(),
        }),
    )
}
