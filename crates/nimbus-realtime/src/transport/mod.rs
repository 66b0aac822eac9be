//! Duplex text channel abstraction.
//!
//! The coordinator only needs four things from a connection: send a text
//! frame, report whether the socket is open, close it, and hand over inbound
//! frames in order. [`ChannelConnector`] opens such a connection for a URL.

pub mod memory;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use nimbus_core::Result;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::{MemoryConnector, MemoryRemote};
pub use websocket::WebSocketConnector;

/// Lifecycle of the underlying socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting,
    /// Frames can be sent.
    Open,
    /// Close requested, not yet acknowledged.
    Closing,
    /// Gone.
    Closed,
}

/// Send-side failures reported by a transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The socket is not in the [`ReadyState::Open`] state.
    #[error("socket is not open")]
    NotOpen,
    /// Any other failure.
    #[error("{0}")]
    Io(String),
}

/// One inbound item from the remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// A text frame.
    Text(String),
    /// The connection ended. `clean` is true when the remote sent a close frame.
    Closed {
        /// Whether the close was orderly.
        clean: bool,
        /// Close reason or transport error, if any.
        reason: Option<String>,
    },
}

/// Outbound half of a connection.
pub trait ChannelSink: Send + Sync {
    /// Current socket state.
    fn ready_state(&self) -> ReadyState;

    /// Queue a text frame for transmission.
    fn send_text(&self, text: String) -> std::result::Result<(), TransportError>;

    /// Begin an orderly close. Idempotent.
    fn close(&self);
}

/// An open connection: a sink plus the ordered inbound frame stream.
pub struct Duplex {
    /// Outbound half.
    pub sink: Arc<dyn ChannelSink>,
    /// Inbound frames, in receive order.
    pub inbound: mpsc::Receiver<InboundFrame>,
}

impl std::fmt::Debug for Duplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Duplex")
            .field("ready_state", &self.sink.ready_state())
            .finish_non_exhaustive()
    }
}

/// Opens connections.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Connect to `url`, which already carries any credentials.
    async fn connect(&self, url: &str) -> Result<Duplex>;
}
