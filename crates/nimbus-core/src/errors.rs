//! Error types for the real-time subscription engine.
//!
//! Every failure the engine can report is a [`RealtimeError`] variant. Errors
//! are `Clone` because a single failure (a rejected subscribe, a shutdown) may
//! be delivered to several observers at once.

use thiserror::Error;

/// Errors from real-time protocol, transport, and subscription operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RealtimeError {
    /// An inbound frame could not be parsed into a known message shape.
    #[error("bad message: {reason}")]
    BadMessage {
        /// What was wrong with the frame.
        reason: String,
    },

    /// The remote rejected a command.
    #[error("Subscription Error: ({code}): {info}")]
    Remote {
        /// Remote error code, as sent.
        code: String,
        /// Remote error description.
        info: String,
    },

    /// The transport reported that the socket is not open.
    #[error("cannot send {context}: socket is not open (connection not started or already closed)")]
    ChannelNotOpen {
        /// What was being sent.
        context: String,
    },

    /// Any other transport send failure.
    #[error("failed to send {context}: {reason}")]
    Send {
        /// What was being sent.
        context: String,
        /// Transport-level reason.
        reason: String,
    },

    /// A `watch` argument is not a valid event subscription type for the resource.
    #[error("bad event subscription type {value:?}: expected one of {expected}")]
    BadEventSubscriptionType {
        /// The rejected value.
        value: String,
        /// Comma-separated list of accepted values.
        expected: String,
    },

    /// The token provider failed.
    #[error("token retrieval failed: {0}")]
    Token(String),

    /// Opening the duplex channel failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection closed (or the client shut down) before the operation finished.
    #[error("connection closed")]
    ConnectionClosed,

    /// The optional command timeout elapsed.
    #[error("command {command} timed out after {timeout_ms}ms")]
    Timeout {
        /// Wire name of the command.
        command: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// An observer can no longer accept events.
    #[error("observer closed")]
    ObserverClosed,

    /// JSON encoding of an outbound message failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The requested capability is not configured.
    #[error("{0} is not supported by this client")]
    Unsupported(String),

    /// The channel log collaborator failed.
    #[error("log retrieval failed: {0}")]
    Log(String),
}

impl RealtimeError {
    /// Build a [`RealtimeError::BadMessage`].
    pub fn bad_message(reason: impl Into<String>) -> Self {
        Self::BadMessage {
            reason: reason.into(),
        }
    }

    /// Whether this error came from the transport rather than the remote or the caller.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ChannelNotOpen { .. } | Self::Send { .. } | Self::Connect(_) | Self::ConnectionClosed
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::BadMessage { .. } => "bad_message",
            Self::Remote { .. } => "remote",
            Self::ChannelNotOpen { .. } => "channel_not_open",
            Self::Send { .. } => "send",
            Self::BadEventSubscriptionType { .. } => "bad_event_subscription_type",
            Self::Token(_) => "token",
            Self::Connect(_) => "connect",
            Self::ConnectionClosed => "connection_closed",
            Self::Timeout { .. } => "timeout",
            Self::ObserverClosed => "observer_closed",
            Self::Serialization(_) => "serialization",
            Self::Unsupported(_) => "unsupported",
            Self::Log(_) => "log",
        }
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for real-time operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;
