//! Readiness gate: outbound traffic flows only while a channel is bound.

use tokio::sync::watch;

/// Gate position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    /// No usable channel; commands queue.
    NotReady,
    /// A channel is bound; commands flow.
    Ready,
}

impl GateState {
    /// Whether commands may flow.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Re-armable `NotReady -> Ready -> NotReady` state machine.
#[derive(Debug)]
pub struct ReadyGate {
    tx: watch::Sender<GateState>,
}

impl ReadyGate {
    /// A closed gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::NotReady);
        Self { tx }
    }

    /// Let traffic through.
    pub fn open(&self) {
        let _ = self.tx.send_replace(GateState::Ready);
    }

    /// Hold traffic until the next [`open`](Self::open).
    pub fn close(&self) {
        let _ = self.tx.send_replace(GateState::NotReady);
    }

    /// Current position.
    pub fn state(&self) -> GateState {
        *self.tx.borrow()
    }

    /// Whether the gate is open.
    pub fn is_open(&self) -> bool {
        self.state().is_ready()
    }

    /// Receiver for tasks that wait on the gate without owning it.
    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.tx.subscribe()
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until `rx` reports [`GateState::Ready`].
///
/// Returns `false` if the gate was dropped first.
pub async fn wait_ready(rx: &mut watch::Receiver<GateState>) -> bool {
    rx.wait_for(GateState::is_ready).await.is_ok()
}
