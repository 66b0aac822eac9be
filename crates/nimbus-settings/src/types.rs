//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every struct is `#[serde(default)]`, so
//! a partial file only overrides what it mentions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "realtime": { "wsUrl": "wss://api.example.com/realtime", "commandTimeoutMs": 15000 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NimbusSettings {
    /// Real-time connection settings.
    pub realtime: RealtimeSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Real-time connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Endpoint of the real-time socket.
    pub ws_url: String,
    /// Query parameter the access token is passed in.
    pub token_query_param: String,
    /// Upper bound on waiting for a command acknowledgement.
    ///
    /// Absent by default: commands wait until the remote answers or the
    /// connection goes away.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_ms: Option<u64>,
    /// Buffer of inbound frames between the socket reader and the dispatcher.
    pub inbound_buffer: usize,
}

impl RealtimeSettings {
    /// The acknowledgement timeout, if one is configured.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/realtime".to_string(),
            token_query_param: "token".to_string(),
            command_timeout_ms: None,
            inbound_buffer: 256,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
