//! Scripted transport for unit tests.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

use crate::delivery::{HookRequest, Transport, TransportError};

/// One scripted response.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    Status(u16),
    Error(&'static str),
}

/// Replays a script of replies and records every request it sees.
///
/// Once the script runs out the fallback reply is used (200 unless built
/// with [`ScriptedTransport::repeating`]).
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    seen: Mutex<Vec<(Instant, HookRequest)>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Reply::Status(200),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn repeating(reply: Reply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: reply,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn request_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<HookRequest> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub(crate) fn sent_at(&self) -> Vec<Instant> {
        self.seen.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    /// Requests whose event (query or JSON body) equals `event`.
    pub(crate) fn requests_for(&self, event: &str) -> Vec<HookRequest> {
        self.requests()
            .into_iter()
            .filter(|request| event_of(request).as_deref() == Some(event))
            .collect()
    }
}

/// Extract the event name from a recorded request.
pub(crate) fn event_of(request: &HookRequest) -> Option<String> {
    if let Some(body) = &request.body {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        return value["event"].as_str().map(str::to_string);
    }

    request
        .query
        .iter()
        .find(|(key, _)| key == "event")
        .map(|(_, value)| value.clone())
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: &HookRequest) -> Result<StatusCode, TransportError> {
        self.seen
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        match reply {
            Reply::Status(code) => Ok(StatusCode::from_u16(code).unwrap()),
            Reply::Error(message) => Err(TransportError::Failed(message.to_string())),
        }
    }
}
