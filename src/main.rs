//! streamhook - webhook dispatcher for streaming engine lifecycle events.
//!
//! ## Configuration
//!
//! - `STREAMHOOK_CONFIG`: path to the TOML config (default: `config/streamhook.toml`)
//! - `RUST_LOG`: logging level (default: "info")

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use streamhook::bridge::{self, BridgeState};
use streamhook::{HookService, ShutdownSignal, StreamhookConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize Logging
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    // 2. Load Configuration
    let config = StreamhookConfig::load()?;

    // 3. Start the hook service (fires startup, starts keep-alive)
    let shutdown = ShutdownSignal::new();
    let service = Arc::new(HookService::start(
        &config.hook,
        &config.dispatcher,
        shutdown.clone(),
    )?);

    if config.server.api_key.is_none() {
        warn!("server.api_key not set, event ingestion is unauthenticated");
    }

    // 4. Build the engine bridge
    let state = BridgeState::new(service.clone(), config.server.api_key.clone());
    let app = bridge::app(state);

    // 5. Serve until SIGINT / SIGTERM
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("streamhook bridge listening on {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.wait().await })
        .await?;

    // 6. Drain in-flight deliveries
    let drained = service.shutdown().await;
    info!(drained = drained, stats = ?service.stats(), "streamhook stopped");

    Ok(())
}
