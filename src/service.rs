//! HookService - the running webhook dispatcher.
//!
//! Constructed once, when the host engine first applies configuration. It
//! owns the resolved endpoint table, the dispatcher and the keep-alive loop,
//! and is passed by reference to whatever delivers engine events.
//!
//! # Example
//!
//! ```rust,ignore
//! use streamhook::{HookService, ShutdownSignal, StreamhookConfig};
//!
//! let config = StreamhookConfig::load()?;
//! let service = HookService::start(&config.hook, &config.dispatcher, ShutdownSignal::new())?;
//!
//! service.handle(&engine_event);
//! // ...
//! service.shutdown().await;
//! ```

use serde_json::Map;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ConfigError, DispatcherConfig, HookConfig};
use crate::delivery::{HttpTransport, RetryPolicy, Transport};
use crate::dispatcher::{Dispatcher, StatsSnapshot};
use crate::endpoint::EndpointTable;
use crate::event::{EngineEvent, HookEvent};
use crate::keepalive::KeepAlive;
use crate::payload::PayloadBuilder;
use crate::router::{RouteResult, Router};
use crate::shutdown::ShutdownSignal;

/// The running dispatcher and everything it shares.
pub struct HookService {
    router: Router,
    dispatcher: Dispatcher,
    shutdown: ShutdownSignal,
    shutdown_timeout: Duration,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl HookService {
    /// Start the service with the HTTP transport.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start(
        hook: &HookConfig,
        pool: &DispatcherConfig,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new().with_timeout(hook.timeout());
        Self::start_with_transport(hook, pool, shutdown, Arc::new(transport))
    }

    /// Start the service with a custom transport.
    ///
    /// Resolves the endpoint table, fires `startup`, then starts the
    /// keep-alive loop if it is enabled.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any configured endpoint is invalid. No
    /// event is sent in that case.
    pub fn start_with_transport(
        hook: &HookConfig,
        pool: &DispatcherConfig,
        shutdown: ShutdownSignal,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let table = Arc::new(EndpointTable::resolve(hook)?);
        let builder = PayloadBuilder::new(hook.extra.clone());
        let policy = RetryPolicy::new(hook.retry_times, hook.retry_delay());
        let dispatcher = Dispatcher::new(transport, policy, pool);
        let router = Router::new(table.clone(), builder.clone(), dispatcher.clone());

        let startup = router.fire(HookEvent::Startup.as_str(), None, Map::new());

        info!(
            endpoints = table.len(),
            startup_dispatched = startup.dispatched(),
            retry_times = policy.attempts(),
            "Hook service started"
        );

        let keepalive = KeepAlive::from_table(hook.keep_alive(), &table).spawn(
            builder,
            dispatcher.clone(),
            &shutdown,
        );

        Ok(Self {
            router,
            dispatcher,
            shutdown,
            shutdown_timeout: pool.shutdown_timeout(),
            keepalive: Mutex::new(keepalive),
        })
    }

    /// Report a host-engine event. Never blocks on delivery.
    pub fn handle(&self, event: &EngineEvent) -> RouteResult {
        self.router.route(event)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.dispatcher.stats()
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn keepalive_running(&self) -> bool {
        self.keepalive
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the keep-alive loop and drain in-flight deliveries.
    ///
    /// Returns `true` if every delivery finished within the configured
    /// shutdown timeout.
    pub async fn shutdown(&self) -> bool {
        self.shutdown.trigger();

        let keepalive = match self.keepalive.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(handle) = keepalive {
            if let Err(e) = handle.await {
                warn!(error = %e, "Keep-alive task ended abnormally");
            }
        }

        self.dispatcher.shutdown(self.shutdown_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RequestEntry, StreamhookConfig};
    use crate::event::Stream;
    use crate::testing::{event_of, ScriptedTransport};

    fn hook_config(requests: &[(&str, &str)], keep_alive_ms: u64) -> HookConfig {
        let mut config = HookConfig {
            keep_alive_ms,
            ..HookConfig::default()
        };
        for (event, url) in requests {
            config
                .request_list
                .insert(event.to_string(), RequestEntry::Url(url.to_string()));
        }
        config
    }

    fn start(hook: &HookConfig, transport: Arc<ScriptedTransport>) -> HookService {
        HookService::start_with_transport(
            hook,
            &DispatcherConfig::default(),
            ShutdownSignal::new(),
            transport,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_fires_once() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let service = start(
            &hook_config(&[("startup", "http://host/startup")], 0),
            transport.clone(),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(event_of(&requests[0]).as_deref(), Some("startup"));
        assert!(!service.keepalive_running());

        assert!(service.shutdown().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_reaches_wildcard() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let service = start(&hook_config(&[("*", "http://host/all")], 0), transport.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;

        let body: serde_json::Value =
            serde_json::from_slice(transport.requests()[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body["event"], "startup");
        assert_eq!(body["stream"], serde_json::Value::Null);

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_started_and_stopped() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let service = start(
            &hook_config(&[("keepalive", "http://host/ka")], 1000),
            transport.clone(),
        );
        assert!(service.keepalive_running());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(transport.requests_for("keepalive").len() >= 2);
        // startup has no endpoint of its own and no wildcard is registered
        assert!(transport.requests_for("startup").is_empty());

        assert!(service.shutdown().await);
        assert!(!service.keepalive_running());

        let before = transport.request_count();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.request_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_needs_target() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let service = start(
            &hook_config(&[("publish", "http://host/p")], 1000),
            transport.clone(),
        );

        assert!(!service.keepalive_running());
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_routes_events() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let service = start(
            &hook_config(&[("publish", "http://host/p"), ("*", "http://host/all")], 0),
            transport.clone(),
        );

        let result = service.handle(&EngineEvent::Publish {
            stream: Stream::new("/live/test"),
        });
        assert_eq!(result.dispatched(), 2);

        assert!(service.shutdown().await);
        assert_eq!(transport.requests_for("publish").len(), 2);
        // startup went to the wildcard
        assert_eq!(transport.requests_for("startup").len(), 1);

        let stats = service.stats();
        assert_eq!(stats.dispatched, 3);
        assert_eq!(stats.delivered, 3);
    }

    #[tokio::test]
    async fn test_invalid_config_sends_nothing() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let hook = hook_config(&[("startup", "relative/path")], 0);

        let result = HookService::start_with_transport(
            &hook,
            &DispatcherConfig::default(),
            ShutdownSignal::new(),
            transport.clone(),
        );

        assert!(matches!(result, Err(ConfigError::InvalidEndpoint { .. })));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_from_toml() {
        let config = StreamhookConfig::parse(
            r#"
            [hook]
            base_url = "http://host/hook"
            retry_times = 2

            [hook.request_list]
            publish = { url = "/publish", method = "GET" }

            [hook.url_list]
            startup = "/startup"
            "#,
        )
        .unwrap();

        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let service = HookService::start_with_transport(
            &config.hook,
            &config.dispatcher,
            ShutdownSignal::new(),
            transport.clone(),
        )
        .unwrap();

        service.handle(&EngineEvent::Publish {
            stream: Stream::new("/live/test"),
        });
        service.shutdown().await;

        let startup = transport.requests_for("startup");
        assert_eq!(startup[0].url, "http://host/hook/startup");

        let publish = transport.requests_for("publish");
        assert_eq!(publish[0].url, "http://host/hook/publish");
        assert!(publish[0].body.is_none());
    }
}
