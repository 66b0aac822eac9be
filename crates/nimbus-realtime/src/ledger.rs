//! Pending-command ledger: matches command responses to their callers.
//!
//! Every outbound command gets a reply slot keyed by its correlation id. The
//! remote echoes the whole request back, so a response is matched by the
//! echoed `correlation_id`, or failing that by the request fingerprint (the
//! canonical payload minus the correlation id).

use std::collections::HashMap;

use nimbus_core::protocol::{CommandReply, CommandResponse, OutboundCommand};
use nimbus_core::{CorrelationId, RealtimeError, Result};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

type ReplyTx = oneshot::Sender<Result<CommandReply>>;

struct PendingEntry {
    fingerprint: String,
    reply_tx: ReplyTx,
}

#[derive(Default)]
struct LedgerState {
    by_id: HashMap<CorrelationId, PendingEntry>,
    by_fingerprint: HashMap<String, CorrelationId>,
}

impl LedgerState {
    fn take(&mut self, id: CorrelationId) -> Option<PendingEntry> {
        let entry = self.by_id.remove(&id)?;
        if self.by_fingerprint.get(&entry.fingerprint) == Some(&id) {
            let _ = self.by_fingerprint.remove(&entry.fingerprint);
        }
        Some(entry)
    }
}

/// Caller-side handle for one pending command.
#[derive(Debug)]
pub struct PendingReply {
    correlation_id: CorrelationId,
    command: &'static str,
    rx: oneshot::Receiver<Result<CommandReply>>,
}

impl PendingReply {
    /// Correlation id of the command this reply belongs to.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Wire name of the command.
    pub fn command(&self) -> &'static str {
        self.command
    }

    /// Wait for the outcome. A slot dropped without an answer reads as
    /// [`RealtimeError::ConnectionClosed`].
    pub async fn wait(self) -> Result<CommandReply> {
        self.rx.await.unwrap_or(Err(RealtimeError::ConnectionClosed))
    }
}

/// Commands sent and not yet answered.
#[derive(Default)]
pub struct PendingLedger {
    state: Mutex<LedgerState>,
}

impl PendingLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `command` as awaiting a response.
    ///
    /// A later registration with the same fingerprint takes over the
    /// fingerprint index; the earlier slot stays reachable by its correlation id.
    pub fn register(&self, command: &OutboundCommand) -> PendingReply {
        let (reply_tx, rx) = oneshot::channel();
        let id = command.correlation_id();
        let mut state = self.state.lock();
        let _ = state
            .by_fingerprint
            .insert(command.fingerprint().to_owned(), id);
        let _ = state.by_id.insert(
            id,
            PendingEntry {
                fingerprint: command.fingerprint().to_owned(),
                reply_tx,
            },
        );
        PendingReply {
            correlation_id: id,
            command: command.command().name(),
            rx,
        }
    }

    /// Settle the command `response` answers.
    ///
    /// Returns false when no pending command matches; such responses are dropped.
    pub fn resolve(&self, response: CommandResponse) -> bool {
        let entry = {
            let mut state = self.state.lock();
            let id = response
                .correlation_id()
                .filter(|id| state.by_id.contains_key(id))
                .or_else(|| state.by_fingerprint.get(&response.fingerprint()).copied());
            id.and_then(|id| state.take(id))
        };
        let Some(entry) = entry else {
            debug!(
                correlation_id = ?response.correlation_id(),
                "command response matches no pending command, dropping"
            );
            return false;
        };
        // caller may have stopped waiting
        let _ = entry.reply_tx.send(response.into_result());
        true
    }

    /// Fail one pending command with `err`.
    pub fn reject(&self, id: CorrelationId, err: RealtimeError) -> bool {
        let entry = self.state.lock().take(id);
        match entry {
            Some(entry) => {
                let _ = entry.reply_tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Forget a pending command without answering it (its caller gave up).
    pub fn abandon(&self, id: CorrelationId) -> bool {
        self.state.lock().take(id).is_some()
    }

    /// Fail every pending command with `err`. Returns how many were failed.
    pub fn fail_all(&self, err: &RealtimeError) -> usize {
        let entries: Vec<PendingEntry> = {
            let mut state = self.state.lock();
            state.by_fingerprint.clear();
            state.by_id.drain().map(|(_, entry)| entry).collect()
        };
        let count = entries.len();
        for entry in entries {
            let _ = entry.reply_tx.send(Err(err.clone()));
        }
        count
    }

    /// Number of unanswered commands.
    pub fn len(&self) -> usize {
        self.state.lock().by_id.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
