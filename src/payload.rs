//! Request Builder - the JSON document reported to remote endpoints.
//!
//! # Example
//!
//! ```json
//! {
//!   "stream": { "path": "/live/test" },
//!   "extra": { "node": "edge-1" },
//!   "event": "publish",
//!   "time": 1760788800
//! }
//! ```

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::event::Stream;

/// Payload of one webhook call.
///
/// Built once per (event, endpoint) dispatch and reused by every attempt, so
/// `time` reflects when the dispatch started, not when a retry happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookPayload {
    /// Stream the event refers to, `null` for startup and keep-alive
    pub stream: Option<Stream>,

    /// Per-call extras merged with the global extras
    pub extra: Map<String, Value>,

    /// Event name
    pub event: String,

    /// Unix seconds at build time
    pub time: i64,
}

impl HookPayload {
    /// Path of the stream, if any.
    pub fn stream_path(&self) -> Option<&str> {
        self.stream.as_ref().map(|stream| stream.path.as_str())
    }
}

/// Builds payloads, merging in the globally configured extras.
#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    extra: Arc<Map<String, Value>>,
}

impl PayloadBuilder {
    pub fn new(extra: Map<String, Value>) -> Self {
        Self {
            extra: Arc::new(extra),
        }
    }

    /// Build the payload for `event`.
    ///
    /// `extra` is the base; global extras are written on top of it and win
    /// on key conflicts.
    pub fn build(
        &self,
        event: &str,
        stream: Option<&Stream>,
        mut extra: Map<String, Value>,
    ) -> HookPayload {
        for (key, value) in self.extra.iter() {
            extra.insert(key.clone(), value.clone());
        }

        HookPayload {
            stream: stream.cloned(),
            extra,
            event: event.to_string(),
            time: Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extras(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_build_with_stream() {
        let builder = PayloadBuilder::default();
        let stream = Stream::new("/live/test");

        let before = Utc::now().timestamp();
        let payload = builder.build("publish", Some(&stream), Map::new());
        let after = Utc::now().timestamp();

        assert_eq!(payload.event, "publish");
        assert_eq!(payload.stream_path(), Some("/live/test"));
        assert!(payload.time >= before && payload.time <= after);
    }

    #[test]
    fn test_global_extras_win_on_conflict() {
        let builder = PayloadBuilder::new(extras(json!({"node": "edge-1", "region": "eu"})));
        let per_call = extras(json!({"node": "caller", "subscriber": {"id": "s1"}}));

        let payload = builder.build("subscribe", None, per_call);

        assert_eq!(
            Value::Object(payload.extra),
            json!({"node": "edge-1", "region": "eu", "subscriber": {"id": "s1"}})
        );
    }

    #[test]
    fn test_serialized_shape() {
        let builder = PayloadBuilder::default();
        let payload = builder.build("keepalive", None, Map::new());

        let value = serde_json::to_value(&payload).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 4);
        assert_eq!(value["stream"], Value::Null);
        assert_eq!(value["extra"], json!({}));
        assert_eq!(value["event"], "keepalive");
        assert!(value["time"].is_i64());
    }
}
