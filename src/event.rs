//! Lifecycle events observed from the host streaming engine.
//!
//! The engine reports what happens to its streams as [`EngineEvent`]s. Each
//! one maps to a [`HookEvent`] name, which is the key used to look up the
//! remote endpoints in the [`EndpointTable`](crate::endpoint::EndpointTable).
//!
//! # Wire format
//!
//! Engine events arriving through the bridge are internally tagged:
//!
//! ```json
//! {
//!   "type": "subscribe",
//!   "subscriber": {
//!     "id": "sub-42",
//!     "stream": { "path": "/live/test" },
//!     "remote": "10.0.0.7:51312"
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Event name that matches every event.
pub const WILDCARD: &str = "*";

/// Names of the events reported to remote endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Fired once when configuration is first applied
    Startup,
    Publish,
    StreamClose,
    Subscribe,
    Unsubscribe,
    /// Synthetic liveness ping, carries no stream
    KeepAlive,
}

impl HookEvent {
    /// All recognized event names, in lifecycle order.
    pub const ALL: [HookEvent; 6] = [
        HookEvent::Startup,
        HookEvent::Publish,
        HookEvent::StreamClose,
        HookEvent::Subscribe,
        HookEvent::Unsubscribe,
        HookEvent::KeepAlive,
    ];

    /// The name used in configuration keys and outbound payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::Startup => "startup",
            HookEvent::Publish => "publish",
            HookEvent::StreamClose => "streamClose",
            HookEvent::Subscribe => "subscribe",
            HookEvent::Unsubscribe => "unsubscribe",
            HookEvent::KeepAlive => "keepalive",
        }
    }

    /// Look up an event by its configured name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == name)
    }

    /// Returns true if `name` is a recognized event name or the wildcard.
    pub fn is_known(name: &str) -> bool {
        name == WILDCARD || Self::from_name(name).is_some()
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media stream known to the host engine.
///
/// Only the path is interpreted; any other fields the engine reports are kept
/// as metadata and serialized alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    /// Identifying path (e.g. `/live/test`)
    pub path: String,

    /// Engine-specific metadata
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Stream {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata field
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A consumer attached to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Engine-assigned subscriber identifier
    pub id: String,

    /// The stream this subscriber is attached to
    pub stream: Stream,

    /// Engine-specific metadata (remote address, protocol, ...)
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Subscriber {
    pub fn new(id: impl Into<String>, stream: Stream) -> Self {
        Self {
            id: id.into(),
            stream,
            metadata: Map::new(),
        }
    }

    /// Attach a metadata field
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A lifecycle notification delivered by the host engine.
///
/// The first-configuration notification is not part of this enum: it is
/// modelled by [`HookService::start`](crate::service::HookService::start),
/// which the engine calls exactly once before delivering any event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// A stream started publishing
    Publish { stream: Stream },

    /// A stream was closed
    StreamClose { stream: Stream },

    /// A subscriber attached to a stream
    Subscribe { subscriber: Subscriber },

    /// A subscriber detached from a stream
    Unsubscribe { subscriber: Subscriber },
}

impl EngineEvent {
    /// The hook event name this notification is reported as.
    pub fn hook_event(&self) -> HookEvent {
        match self {
            EngineEvent::Publish { .. } => HookEvent::Publish,
            EngineEvent::StreamClose { .. } => HookEvent::StreamClose,
            EngineEvent::Subscribe { .. } => HookEvent::Subscribe,
            EngineEvent::Unsubscribe { .. } => HookEvent::Unsubscribe,
        }
    }

    /// The stream the notification refers to.
    pub fn stream(&self) -> &Stream {
        match self {
            EngineEvent::Publish { stream } | EngineEvent::StreamClose { stream } => stream,
            EngineEvent::Subscribe { subscriber } | EngineEvent::Unsubscribe { subscriber } => {
                &subscriber.stream
            }
        }
    }

    /// Per-call extra parameters carried by this notification.
    ///
    /// Subscriber events report the full subscriber under `"subscriber"`.
    pub fn extra(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        if let EngineEvent::Subscribe { subscriber } | EngineEvent::Unsubscribe { subscriber } =
            self
        {
            match serde_json::to_value(subscriber) {
                Ok(value) => {
                    extra.insert("subscriber".to_string(), value);
                }
                Err(e) => {
                    tracing::warn!(
                        subscriber = %subscriber.id,
                        error = %e,
                        "Failed to serialize subscriber"
                    );
                }
            }
        }
        extra
    }
}
