//! # streamhook
//!
//! Reports lifecycle events of a streaming engine (stream published, stream
//! closed, subscriber attached/detached, startup, keep-alive) as HTTP
//! callbacks to configured remote endpoints.
//!
//! ## Architecture
//!
//! ```text
//! Engine -> Router -> PayloadBuilder -> Dispatcher -> Transport -> network
//! KeepAlive ------------^
//! ```
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration and validation
//! - [`event`]: Engine events and hook event names
//! - [`endpoint`]: Endpoint resolution into a read-only table
//! - [`payload`]: Payload construction
//! - [`delivery`]: Transports and the retry policy
//! - [`dispatcher`]: Managed fire-and-forget delivery pool
//! - [`keepalive`]: Periodic keep-alive loop
//! - [`router`]: Exact + wildcard event fan-out
//! - [`service`]: The running service, built once from configuration
//! - [`bridge`]: HTTP surface for engines delivering events over the network

pub mod bridge;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod endpoint;
pub mod event;
pub mod keepalive;
pub mod payload;
pub mod router;
pub mod service;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at crate root
pub use config::{ConfigError, StreamhookConfig};
pub use endpoint::{Endpoint, EndpointTable, HttpMethod};
pub use event::{EngineEvent, HookEvent, Stream, Subscriber, WILDCARD};
pub use router::Router;
pub use service::HookService;
pub use shutdown::ShutdownSignal;
