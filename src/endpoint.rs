//! Endpoint Resolver - turns hook configuration into an endpoint table.
//!
//! Resolution runs once, when configuration is first applied. After that the
//! [`EndpointTable`] is read-only and shared by every dispatch task.
//!
//! # Resolution Rules
//!
//! ```text
//! Rule            | Behaviour
//! ----------------|------------------------------------------------------
//! base URL        | prepended once to URLs that carry no scheme
//! method          | defaults to POST
//! headers         | endpoint headers layered over global ones, endpoint wins
//! no headers      | the global header set is shared, not copied
//! precedence      | request_list entries win, url_list only fills gaps
//! ```

use reqwest::Url;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ConfigError, HookConfig, RequestEntry};
use crate::event::{HookEvent, WILDCARD};

/// Header set attached to an endpoint.
pub type HeaderSet = BTreeMap<String, String>;

/// HTTP method used to call an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(format!(
                "unsupported method '{}' (expected GET, POST, PUT, PATCH or DELETE)",
                s
            )),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A resolved remote destination for one event name.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    /// Absolute URL, base URL already applied
    pub url: String,

    pub method: HttpMethod,

    /// Effective headers; may be the shared global set
    pub headers: Arc<HeaderSet>,
}

/// Event name -> endpoint lookup table.
///
/// Built once by [`EndpointTable::resolve`] and never mutated afterwards, so
/// it can be shared behind an `Arc` without locking.
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    endpoints: HashMap<String, Arc<Endpoint>>,
}

impl EndpointTable {
    /// Resolve every configured request into an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEndpoint`] if a URL is not absolute after
    /// base-URL prefixing or a header is not valid HTTP.
    pub fn resolve(config: &HookConfig) -> Result<Self, ConfigError> {
        let global_headers = Arc::new(config.header.clone());
        validate_headers(WILDCARD, &global_headers)?;

        let base_url = config.base_url.as_deref().filter(|base| !base.is_empty());
        let mut endpoints = HashMap::new();

        for (event, entry) in &config.request_list {
            let endpoint = resolve_entry(event, entry, base_url, &global_headers)?;
            endpoints.insert(event.clone(), Arc::new(endpoint));
        }

        // Legacy URL list only fills events the request list left out
        for (event, url) in &config.url_list {
            if endpoints.contains_key(event) {
                debug!(
                    event = %event,
                    "Legacy URL ignored, request list entry takes precedence"
                );
                continue;
            }

            let entry = RequestEntry::Url(url.clone());
            let endpoint = resolve_entry(event, &entry, base_url, &global_headers)?;
            endpoints.insert(event.clone(), Arc::new(endpoint));
        }

        let table = Self { endpoints };

        info!(
            endpoints = table.len(),
            events = ?table.event_names(),
            "Endpoint table resolved"
        );

        Ok(table)
    }

    /// Get the endpoint registered for an exact event name.
    pub fn get(&self, event: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.get(event)
    }

    /// Endpoints that receive `event`: its own endpoint, then the wildcard one.
    ///
    /// Returns (name the endpoint is registered under, endpoint) pairs.
    pub fn matching(&self, event: &str) -> Vec<(&str, Arc<Endpoint>)> {
        let mut matched = Vec::with_capacity(2);

        if event != WILDCARD {
            if let Some((name, endpoint)) = self.endpoints.get_key_value(event) {
                matched.push((name.as_str(), endpoint.clone()));
            }
        }

        if let Some((name, endpoint)) = self.endpoints.get_key_value(WILDCARD) {
            matched.push((name.as_str(), endpoint.clone()));
        }

        matched
    }

    /// Endpoints the keep-alive loop pings.
    pub fn keepalive_targets(&self) -> Vec<Arc<Endpoint>> {
        self.matching(HookEvent::KeepAlive.as_str())
            .into_iter()
            .map(|(_, endpoint)| endpoint)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// List all event names with a registered endpoint, sorted.
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

fn resolve_entry(
    event: &str,
    entry: &RequestEntry,
    base_url: Option<&str>,
    global_headers: &Arc<HeaderSet>,
) -> Result<Endpoint, ConfigError> {
    let (url, method, headers) = match entry {
        RequestEntry::Url(url) => (url, HttpMethod::Post, global_headers.clone()),
        RequestEntry::Detailed {
            url,
            method,
            header,
        } => {
            let headers = match header {
                Some(own) => {
                    validate_headers(event, own)?;
                    Arc::new(merge_headers(global_headers, own))
                }
                None => global_headers.clone(),
            };
            (url, method.unwrap_or_default(), headers)
        }
    };

    let url = apply_base_url(url, base_url);
    if let Err(reason) = check_absolute(&url) {
        return Err(ConfigError::InvalidEndpoint {
            event: event.to_string(),
            reason,
        });
    }

    debug!(event = %event, url = %url, method = %method, "Resolved endpoint");

    Ok(Endpoint {
        url,
        method,
        headers,
    })
}

/// Layer endpoint headers over the global set; endpoint values win.
fn merge_headers(global: &HeaderSet, own: &HeaderSet) -> HeaderSet {
    let mut merged = global.clone();
    merged.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Prefix `url` with `base_url` unless it already names a scheme.
fn apply_base_url(url: &str, base_url: Option<&str>) -> String {
    match base_url {
        Some(base) if !has_scheme(url) => format!("{}{}", base, url),
        _ => url.to_string(),
    }
}

/// Returns true if `url` starts with `scheme://`.
fn has_scheme(url: &str) -> bool {
    match url.split_once("://") {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn check_absolute(url: &str) -> Result<(), String> {
    let parsed = Url::parse(url).map_err(|e| format!("'{}' is not an absolute URL: {}", url, e))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("'{}' uses unsupported scheme '{}'", url, other)),
    }
}

fn validate_headers(event: &str, headers: &HeaderSet) -> Result<(), ConfigError> {
    for (name, value) in headers {
        let invalid = reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err()
            || reqwest::header::HeaderValue::from_str(value).is_err();

        if invalid {
            return Err(ConfigError::InvalidEndpoint {
                event: event.to_string(),
                reason: format!("header '{}' is not a valid HTTP header", name),
            });
        }
    }
    Ok(())
}
