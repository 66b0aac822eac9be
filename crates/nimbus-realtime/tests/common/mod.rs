//! Shared helpers for the real-time integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use nimbus_realtime::transport::{MemoryConnector, MemoryRemote};
use nimbus_realtime::{EventStream, RealtimeClient, ResourceEvent, Result, StaticToken, TokenProvider};
use nimbus_settings::RealtimeSettings;
use serde_json::{Value, json};
use tokio::time::timeout;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A client connected to an in-memory remote.
pub struct Harness {
    pub client: RealtimeClient,
    pub remote: MemoryRemote,
    pub connector: Arc<MemoryConnector>,
}

impl Harness {
    /// Connected client using a static token.
    pub async fn connected() -> Self {
        Self::connected_with(Arc::new(StaticToken::new("tok"))).await
    }

    /// Connected client using `tokens`.
    pub async fn connected_with(tokens: Arc<dyn TokenProvider>) -> Self {
        let connector = Arc::new(MemoryConnector::new());
        let remote = connector.queue_pair(64);
        let client = RealtimeClient::new(RealtimeSettings::default(), connector.clone(), tokens);
        let _ = client.connect().await.expect("connect");
        Self {
            client,
            remote,
            connector,
        }
    }

    /// Next command the client sent.
    pub async fn next_command(&mut self) -> Value {
        timeout(TIMEOUT, self.remote.recv_json())
            .await
            .expect("command within timeout")
            .expect("client still attached")
    }

    /// Let background tasks run, then assert nothing else was sent.
    pub async fn assert_quiet(&mut self) {
        settle().await;
        if let Some(extra) = self.remote.try_recv_json() {
            panic!("unexpected command: {extra}");
        }
    }

    /// Acknowledge `request`.
    pub async fn ack(&self, request: &Value) {
        assert!(self.remote.push_json(&ack(request)).await);
    }

    /// Reject `request` with a remote error.
    pub async fn reject(&self, request: &Value, code: Value, info: &str) {
        let frame = json!({
            "type": "command response",
            "data": {"request": request, "error": {"code": code, "info": info}},
        });
        assert!(self.remote.push_json(&frame).await);
    }

    /// Push a resource event.
    pub async fn push_event(&self, kind: &str, name: &str, action: &str, data: Value) {
        assert!(self.remote.push_json(&event(kind, name, action, data)).await);
    }
}

/// A successful command response echoing `request`.
pub fn ack(request: &Value) -> Value {
    json!({"type": "command response", "data": {"request": request, "response": {}}})
}

/// An event frame.
pub fn event(kind: &str, name: &str, action: &str, data: Value) -> Value {
    json!({
        "type": "event",
        "data": {
            "action": action,
            "resource": {"type": kind, "name": name},
            "modifier": {"id": "u1", "type": "user"},
            "timestamp": "2024-05-01T12:00:00Z",
            "data": data,
        }
    })
}

/// Command name of a sent command.
pub fn command_name(command: &Value) -> &str {
    command["data"]["command"].as_str().unwrap_or_default()
}

/// `action` argument of a subscribe/unsubscribe, as strings.
pub fn actions(command: &Value) -> Vec<String> {
    command["data"]["arguments"]["action"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|a| a.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

/// Let spawned tasks make progress.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Next item from `stream`, failing the test on timeout.
pub async fn next_item(stream: &mut EventStream) -> Option<Result<ResourceEvent>> {
    timeout(TIMEOUT, stream.next()).await.expect("stream item within timeout")
}
