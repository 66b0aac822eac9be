//! In-process duplex for driving the coordinator without a network.
//!
//! [`pair`] returns the client half as a [`Duplex`] and the server half as a
//! [`MemoryRemote`], which sees every frame the client sends and can push
//! inbound frames, flip the ready state, or inject a send failure.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use nimbus_core::{RealtimeError, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{ChannelConnector, ChannelSink, Duplex, InboundFrame, ReadyState, TransportError};

/// Create a connected in-memory pair. `buffer` bounds the inbound queue.
pub fn pair(buffer: usize) -> (Duplex, MemoryRemote) {
    let state = Arc::new(RwLock::new(ReadyState::Open));
    let fail_next = Arc::new(Mutex::new(None));
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::channel(buffer.max(1));

    let sink = MemorySink {
        state: Arc::clone(&state),
        fail_next: Arc::clone(&fail_next),
        sent: sent_tx,
    };
    let duplex = Duplex {
        sink: Arc::new(sink),
        inbound: inbound_rx,
    };
    let remote = MemoryRemote {
        state,
        fail_next,
        sent: sent_rx,
        inbound: inbound_tx,
    };
    (duplex, remote)
}

struct MemorySink {
    state: Arc<RwLock<ReadyState>>,
    fail_next: Arc<Mutex<Option<TransportError>>>,
    sent: mpsc::UnboundedSender<String>,
}

impl ChannelSink for MemorySink {
    fn ready_state(&self) -> ReadyState {
        *self.state.read()
    }

    fn send_text(&self, text: String) -> std::result::Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        self.sent.send(text).map_err(|_| TransportError::NotOpen)
    }

    fn close(&self) {
        *self.state.write() = ReadyState::Closed;
    }
}

/// Server side of an in-memory pair.
pub struct MemoryRemote {
    state: Arc<RwLock<ReadyState>>,
    fail_next: Arc<Mutex<Option<TransportError>>>,
    sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::Sender<InboundFrame>,
}

impl MemoryRemote {
    /// Next frame the client sent, waiting for it.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// Next frame the client sent, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.sent.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Next already-sent frame, if any, without waiting.
    pub fn try_recv_json(&mut self) -> Option<Value> {
        let text = self.sent.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Push an inbound frame. Returns false once the client side is gone.
    pub async fn push(&self, frame: InboundFrame) -> bool {
        self.inbound.send(frame).await.is_ok()
    }

    /// Push a JSON text frame.
    pub async fn push_json(&self, value: &Value) -> bool {
        self.push(InboundFrame::Text(value.to_string())).await
    }

    /// Current state as the client sees it.
    pub fn ready_state(&self) -> ReadyState {
        *self.state.read()
    }

    /// Force the state the client observes.
    pub fn set_ready_state(&self, state: ReadyState) {
        *self.state.write() = state;
    }

    /// Make the next client send fail with `err`.
    pub fn fail_next_send(&self, err: TransportError) {
        *self.fail_next.lock() = Some(err);
    }

    /// Close from the remote side.
    pub async fn close(&self, clean: bool) {
        self.set_ready_state(ReadyState::Closed);
        let _ = self
            .push(InboundFrame::Closed {
                clean,
                reason: None,
            })
            .await;
    }
}

/// Connector handing out pre-built in-memory duplexes in FIFO order.
#[derive(Default)]
pub struct MemoryConnector {
    queued: Mutex<VecDeque<Duplex>>,
    urls: Mutex<Vec<String>>,
}

impl MemoryConnector {
    /// Empty connector; every connect fails until a duplex is queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fresh pair and return its remote half.
    pub fn queue_pair(&self, buffer: usize) -> MemoryRemote {
        let (duplex, remote) = pair(buffer);
        self.queued.lock().push_back(duplex);
        remote
    }

    /// URLs passed to [`ChannelConnector::connect`], in call order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl ChannelConnector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Duplex> {
        self.urls.lock().push(url.to_owned());
        self.queued
            .lock()
            .pop_front()
            .ok_or_else(|| RealtimeError::Connect(format!("connection refused: {url}")))
    }
}
