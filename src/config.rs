//! Configuration module for streamhook.
//!
//! Loads configuration from TOML files with environment variable substitution.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 3000
//!
//! [hook]
//! keep_alive_ms = 30000
//! base_url = "http://media-control.internal/hooks"
//!
//! [hook.header]
//! Authorization = "Bearer ${HOOK_TOKEN}"
//!
//! [hook.request_list]
//! "*" = "/all"
//! publish = { url = "/publish", method = "GET" }
//!
//! [hook.url_list]
//! streamClose = "/close"
//! ```

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::endpoint::{EndpointTable, HttpMethod};
use crate::event::HookEvent;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid endpoint for event '{event}': {reason}")]
    InvalidEndpoint { event: String, reason: String },
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StreamhookConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub hook: HookConfig,
}

/// Bridge server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_port() -> u16 {
    3000
}

/// Delivery pool configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of deliveries running at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Maximum deliveries outstanding, running or waiting for a slot.
    /// Dispatches beyond it are dropped.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// Upper bound on how long shutdown waits for running deliveries
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            max_pending: default_max_pending(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl DispatcherConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn default_max_in_flight() -> usize {
    64
}

fn default_max_pending() -> usize {
    1024
}

fn default_shutdown_timeout_ms() -> u64 {
    30000
}

/// Webhook configuration: where events go and how they are retried.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HookConfig {
    /// Keep-alive interval, 0 disables the keep-alive loop
    #[serde(default)]
    pub keep_alive_ms: u64,

    /// Attempts per delivery
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,

    /// Fixed delay between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-attempt HTTP timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Prefix applied to endpoint URLs that carry no scheme
    #[serde(default)]
    pub base_url: Option<String>,

    /// Global headers sent with every request
    #[serde(default)]
    pub header: BTreeMap<String, String>,

    /// Per-event requests: key is the event name (`*` for all events)
    #[serde(default)]
    pub request_list: BTreeMap<String, RequestEntry>,

    /// Legacy per-event URL list, only fills events missing from `request_list`
    #[serde(default)]
    pub url_list: BTreeMap<String, String>,

    /// Global extra parameters merged into every payload
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            keep_alive_ms: 0,
            retry_times: default_retry_times(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
            base_url: None,
            header: BTreeMap::new(),
            request_list: BTreeMap::new(),
            url_list: BTreeMap::new(),
            extra: Map::new(),
        }
    }
}

fn default_retry_times() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    10000
}

impl HookConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// One value of `[hook.request_list]`.
///
/// ```toml
/// publish = "/publish"
/// subscribe = { url = "/sub", method = "GET", header = { X-Token = "abc" } }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "toml::Value")]
pub enum RequestEntry {
    /// Plain URL, POST with the global headers
    Url(String),

    /// URL with optional method and headers
    Detailed {
        url: String,
        method: Option<HttpMethod>,
        header: Option<BTreeMap<String, String>>,
    },
}

impl RequestEntry {
    pub fn url(&self) -> &str {
        match self {
            RequestEntry::Url(url) | RequestEntry::Detailed { url, .. } => url,
        }
    }
}

impl TryFrom<toml::Value> for RequestEntry {
    type Error = String;

    fn try_from(value: toml::Value) -> Result<Self, Self::Error> {
        let table = match value {
            toml::Value::String(url) => return Ok(RequestEntry::Url(url)),
            toml::Value::Table(table) => table,
            other => {
                return Err(format!(
                    "request must be a URL string or a table, found {}",
                    other.type_str()
                ))
            }
        };

        let mut url = None;
        let mut method = None;
        let mut header = None;

        for (key, value) in table {
            match key.as_str() {
                "url" => match value {
                    toml::Value::String(s) => url = Some(s),
                    other => {
                        return Err(format!("'url' must be a string, found {}", other.type_str()))
                    }
                },
                "method" => match value {
                    toml::Value::String(s) => method = Some(s.parse::<HttpMethod>()?),
                    other => {
                        return Err(format!("'method' must be a string, found {}", other.type_str()))
                    }
                },
                "header" => header = Some(parse_header_table(value)?),
                unknown => {
                    return Err(format!(
                        "unknown key '{}' (expected url, method or header)",
                        unknown
                    ))
                }
            }
        }

        let url = url.ok_or_else(|| "request table is missing 'url'".to_string())?;

        Ok(RequestEntry::Detailed {
            url,
            method,
            header,
        })
    }
}

fn parse_header_table(value: toml::Value) -> Result<BTreeMap<String, String>, String> {
    let table = match value {
        toml::Value::Table(table) => table,
        other => return Err(format!("'header' must be a table, found {}", other.type_str())),
    };

    table
        .into_iter()
        .map(|(name, value)| match value {
            toml::Value::String(s) => Ok((name, s)),
            other => Err(format!(
                "header '{}' must be a string, found {}",
                name,
                other.type_str()
            )),
        })
        .collect()
}

impl StreamhookConfig {
    /// Load configuration from the default path or STREAMHOOK_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = env::var("STREAMHOOK_CONFIG")
            .unwrap_or_else(|_| "config/streamhook.toml".to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;

        info!(
            requests = config.hook.request_list.len(),
            legacy_urls = config.hook.url_list.len(),
            keep_alive_ms = config.hook.keep_alive_ms,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content);

        debug!("Parsing TOML configuration");
        let config: StreamhookConfig = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.max_in_flight == 0 {
            return Err(ConfigError::ValidationError(
                "dispatcher.max_in_flight must be at least 1".to_string(),
            ));
        }

        if self.dispatcher.max_pending < self.dispatcher.max_in_flight {
            return Err(ConfigError::ValidationError(format!(
                "dispatcher.max_pending ({}) must be at least max_in_flight ({})",
                self.dispatcher.max_pending, self.dispatcher.max_in_flight
            )));
        }

        let hook = &self.hook;
        let events = hook.request_list.keys().chain(hook.url_list.keys());

        for event in events {
            if !HookEvent::is_known(event) {
                warn!(
                    event = %event,
                    "Request configured for an event the engine never reports"
                );
            }
        }

        for field in self.unresolved_placeholders() {
            if field == "server.api_key" {
                warn!(
                    field = %field,
                    "API key is an unsubstituted placeholder, clients must send it verbatim"
                );
            } else {
                warn!(
                    field = %field,
                    "Configuration value contains unsubstituted environment variable"
                );
            }
        }

        // Resolve once so malformed endpoints fail at load time
        EndpointTable::resolve(hook)?;

        Ok(())
    }

    /// Dotted paths of every string value still holding a `${VAR}` placeholder.
    ///
    /// Values are never included, only where they live.
    pub fn unresolved_placeholders(&self) -> Vec<String> {
        let hook = &self.hook;
        let mut candidates: Vec<(String, &str)> = Vec::new();

        if let Some(api_key) = &self.server.api_key {
            candidates.push(("server.api_key".to_string(), api_key.as_str()));
        }
        if let Some(base_url) = &hook.base_url {
            candidates.push(("hook.base_url".to_string(), base_url.as_str()));
        }
        for (name, value) in &hook.header {
            candidates.push((format!("hook.header.{}", name), value.as_str()));
        }
        for (event, entry) in &hook.request_list {
            candidates.push((format!("hook.request_list.{}.url", event), entry.url()));
            if let RequestEntry::Detailed {
                header: Some(header),
                ..
            } = entry
            {
                for (name, value) in header {
                    let field = format!("hook.request_list.{}.header.{}", event, name);
                    candidates.push((field, value.as_str()));
                }
            }
        }
        for (event, url) in &hook.url_list {
            candidates.push((format!("hook.url_list.{}", event), url.as_str()));
        }

        let mut fields: Vec<String> = candidates
            .into_iter()
            .filter(|(_, value)| value.contains("${"))
            .map(|(field, _)| field)
            .collect();

        for (key, value) in &hook.extra {
            collect_json_placeholders(format!("hook.extra.{}", key), value, &mut fields);
        }

        fields
    }
}

fn collect_json_placeholders(path: String, value: &Value, fields: &mut Vec<String>) {
    match value {
        Value::String(s) if s.contains("${") => fields.push(path),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_json_placeholders(format!("{}[{}]", path, index), item, fields);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                collect_json_placeholders(format!("{}.{}", path, key), item, fields);
            }
        }
        _ => {}
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    });

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}
