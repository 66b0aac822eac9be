//! Connection coordinator.
//!
//! Owns the subscription registry, the pending-command ledger, the readiness
//! gate and the (at most one) live channel. Two kinds of background task do
//! the I/O:
//!
//! - one **outbox pump** per coordinator drains queued commands in FIFO order,
//!   and only while the gate is open;
//! - one **dispatcher** per channel parses inbound frames in receive order and
//!   routes them: command responses to the ledger, events to the registry,
//!   notifications to a token refresh.
//!
//! Registry decisions and the enqueue of the command they imply happen under
//! the registry lock, so commands reach the wire in decision order. Lock
//! order is registry, then channel, then ledger.
//!
//! Subscriptions outlive channels: binding a new channel re-sends one
//! subscribe per resource for every key whose subscribe went out earlier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use nimbus_core::protocol::{
    Command, CommandReply, InboundMessage, Notification, OutboundCommand, parse_inbound,
};
use nimbus_core::{
    ConnectionId, CorrelationSequence, EventSubscription, EventType, ObserverId, RealtimeError,
    ResourceEvent, ResourceIdentity, Result, SubscriptionKey,
};
use nimbus_settings::RealtimeSettings;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::TokenProvider;
use crate::gate::{GateState, ReadyGate, wait_ready};
use crate::ledger::{PendingLedger, PendingReply};
use crate::registry::{Observer, SubscriptionRegistry, wire_actions};
use crate::transport::{ChannelSink, Duplex, InboundFrame, TransportError};

/// Tunables for a [`Coordinator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Upper bound on waiting for a command acknowledgement. `None` waits
    /// until the remote answers or the coordinator shuts down.
    pub command_timeout: Option<Duration>,
}

impl CoordinatorConfig {
    /// Derive from loaded settings.
    pub fn from_settings(settings: &RealtimeSettings) -> Self {
        Self {
            command_timeout: settings.command_timeout(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from_settings(&RealtimeSettings::default())
    }
}

/// A subscribe queued for the wire, with the event types it covers.
pub(crate) struct PendingSubscribe {
    resource: ResourceIdentity,
    events: Vec<EventType>,
    reply: PendingReply,
}

struct LiveChannel {
    id: ConnectionId,
    sink: Arc<dyn ChannelSink>,
    dispatcher: JoinHandle<()>,
}

struct Shared {
    config: CoordinatorConfig,
    tokens: Arc<dyn TokenProvider>,
    registry: Mutex<SubscriptionRegistry>,
    ledger: PendingLedger,
    sequence: CorrelationSequence,
    gate: ReadyGate,
    outbox: mpsc::UnboundedSender<OutboundCommand>,
    channel: Mutex<Option<LiveChannel>>,
    shutdown: CancellationToken,
    malformed: AtomicU64,
    stale: AtomicU64,
}

impl Shared {
    fn current_sink(&self) -> Option<Arc<dyn ChannelSink>> {
        self.channel.lock().as_ref().map(|live| Arc::clone(&live.sink))
    }

    /// Close the gate and drop the live channel.
    ///
    /// With `expected` set, only that connection is released; a dispatcher
    /// that outlived its channel must not tear down a newer one. A dispatcher
    /// releasing its own channel passes `abort = false`.
    fn release(&self, expected: Option<&ConnectionId>, abort: bool) -> bool {
        let mut channel = self.channel.lock();
        let matches = channel
            .as_ref()
            .is_some_and(|live| expected.is_none_or(|id| *id == live.id));
        if !matches {
            return false;
        }
        self.gate.close();
        if let Some(live) = channel.take() {
            live.sink.close();
            if abort {
                live.dispatcher.abort();
            }
            info!(connection = %live.id, "real-time channel released");
        }
        true
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(live) = self.channel.get_mut().take() {
            live.sink.close();
            live.dispatcher.abort();
        }
    }
}

/// Real-time connection coordinator. Cheap to clone; clones share state.
///
/// Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("ready", &self.is_ready())
            .field("pending_commands", &self.pending_commands())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// New coordinator with no channel bound. Commands queue until [`start`](Self::start).
    pub fn new(config: CoordinatorConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            tokens,
            registry: Mutex::new(SubscriptionRegistry::new()),
            ledger: PendingLedger::new(),
            sequence: CorrelationSequence::new(),
            gate: ReadyGate::new(),
            outbox: outbox_tx,
            channel: Mutex::new(None),
            shutdown: CancellationToken::new(),
            malformed: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        });
        drop(tokio::spawn(run_outbox(
            Arc::downgrade(&shared),
            shared.gate.subscribe(),
            outbox_rx,
            shared.shutdown.clone(),
        )));
        Self { shared }
    }

    /// Bind `duplex` as the live channel and open the gate.
    ///
    /// A previously bound channel is released first. Keys subscribed on an
    /// earlier channel are subscribed again on this one, after anything
    /// already queued.
    pub fn start(&self, duplex: Duplex) -> Result<ConnectionId> {
        if self.shared.shutdown.is_cancelled() {
            duplex.sink.close();
            return Err(RealtimeError::ConnectionClosed);
        }
        let Duplex { sink, inbound } = duplex;
        let id = ConnectionId::new();

        let mut registry = self.shared.registry.lock();
        let mut channel = self.shared.channel.lock();
        self.shared.gate.close();
        if let Some(old) = channel.take() {
            old.sink.close();
            old.dispatcher.abort();
            info!(connection = %old.id, "replacing real-time channel");
        }
        let dispatcher = tokio::spawn(run_dispatcher(
            Arc::downgrade(&self.shared),
            id.clone(),
            inbound,
        ));
        *channel = Some(LiveChannel {
            id: id.clone(),
            sink,
            dispatcher,
        });
        let resubscribes: Vec<PendingSubscribe> = registry
            .take_wired()
            .into_iter()
            .map(|(resource, events)| {
                debug!(%resource, ?events, connection = %id, "resubscribing");
                self.subscribe(resource, events)
            })
            .collect();
        self.shared.gate.open();
        drop(channel);
        drop(registry);

        info!(connection = %id, resubscribed = resubscribes.len(), "real-time channel started");
        for pending in resubscribes {
            drop(tokio::spawn(self.clone().confirm_subscribe(pending)));
        }
        Ok(id)
    }

    /// Close the gate and drop the live channel, if any.
    ///
    /// Queued and future commands wait for the next [`start`](Self::start).
    /// Subscriptions stay registered and are re-sent by that `start`.
    pub fn reset(&self) -> bool {
        self.shared.release(None, true)
    }

    /// Release the channel, complete every observer and fail every pending
    /// command with [`RealtimeError::ConnectionClosed`]. Irreversible.
    pub fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();
        let _ = self.reset();
        let completed = self.shared.registry.lock().complete_all();
        let failed = self
            .shared
            .ledger
            .fail_all(&RealtimeError::ConnectionClosed);
        info!(completed, failed, "real-time coordinator shut down");
    }

    /// Send `command` and wait for its acknowledgement.
    pub async fn send_command(&self, command: Command) -> Result<CommandReply> {
        let reply = self.enqueue(command);
        self.await_reply(reply).await
    }

    /// Queue `command` behind the readiness gate and register its reply slot.
    pub(crate) fn enqueue(&self, command: Command) -> PendingReply {
        let outbound = OutboundCommand::new(self.shared.sequence.next_id(), command);
        let reply = self.shared.ledger.register(&outbound);
        let correlation_id = outbound.correlation_id();
        let name = outbound.command().name();

        if self.shared.shutdown.is_cancelled() || self.shared.outbox.send(outbound).is_err() {
            let _ = self
                .shared
                .ledger
                .reject(correlation_id, RealtimeError::ConnectionClosed);
        } else {
            debug!(command = name, %correlation_id, "command queued");
        }
        reply
    }

    /// Wait for `reply`, bounded by the configured command timeout.
    pub(crate) async fn await_reply(&self, reply: PendingReply) -> Result<CommandReply> {
        let Some(limit) = self.shared.config.command_timeout else {
            return reply.wait().await;
        };
        let correlation_id = reply.correlation_id();
        let command = reply.command();
        if let Ok(outcome) = tokio::time::timeout(limit, reply.wait()).await {
            outcome
        } else {
            let _ = self.shared.ledger.abandon(correlation_id);
            warn!(command, %correlation_id, "command timed out");
            Err(RealtimeError::Timeout {
                command: command.to_owned(),
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }

    /// Register `observer` for `events` on `resource`.
    ///
    /// Returns the pending subscribe for the event types that had no observer
    /// yet, or `None` when every type was already subscribed.
    pub(crate) fn attach(
        &self,
        resource: &ResourceIdentity,
        events: &[EventType],
        id: &ObserverId,
        observer: &Arc<dyn Observer>,
    ) -> Option<PendingSubscribe> {
        let mut registry = self.shared.registry.lock();
        let fresh: Vec<EventType> = events
            .iter()
            .copied()
            .filter(|&event| {
                registry.add_observer(SubscriptionKey::new(resource.clone(), event), id, observer)
            })
            .collect();
        if fresh.is_empty() {
            return None;
        }
        debug!(%resource, events = ?fresh, observer = %id, "subscribing");
        Some(self.subscribe(resource.clone(), fresh))
    }

    // callers hold the registry lock
    fn subscribe(&self, resource: ResourceIdentity, events: Vec<EventType>) -> PendingSubscribe {
        let reply = self.enqueue(Command::Subscribe {
            actions: wire_actions(&events),
            resource: resource.clone(),
        });
        PendingSubscribe {
            resource,
            events,
            reply,
        }
    }

    /// Wait for a subscribe's acknowledgement; on failure, fail every
    /// observer of the keys it covered.
    pub(crate) async fn confirm_subscribe(self, pending: PendingSubscribe) {
        let PendingSubscribe {
            resource,
            events,
            reply,
        } = pending;
        let correlation_id = reply.correlation_id();
        let error = match self.await_reply(reply).await {
            Ok(_) => {
                debug!(%resource, %correlation_id, "subscription acknowledged");
                return;
            }
            Err(error) => error,
        };
        warn!(%resource, ?events, %correlation_id, %error, "subscription failed");
        if let Some(cleanup) = self.fail_subscription(&resource, &events, &error) {
            if let Err(error) = self.await_reply(cleanup).await {
                debug!(%error, "cleanup unsubscribe failed");
            }
        }
    }

    /// Drop the keys for `events` on `resource` and deliver `error` to each
    /// observer that held one. Returns the cleanup unsubscribe, if any key existed.
    fn fail_subscription(
        &self,
        resource: &ResourceIdentity,
        events: &[EventType],
        error: &RealtimeError,
    ) -> Option<PendingReply> {
        let mut failed: Vec<(ObserverId, Arc<dyn Observer>)> = Vec::new();
        let cleanup = {
            let mut registry = self.shared.registry.lock();
            let mut dropped = Vec::new();
            for &event in events {
                let Some(observers) = registry.remove_key(&SubscriptionKey::new(resource.clone(), event)) else {
                    continue;
                };
                dropped.push(event);
                for (id, observer) in observers {
                    if !failed.iter().any(|(seen, _)| *seen == id) {
                        failed.push((id, observer));
                    }
                }
            }
            (!dropped.is_empty()).then(|| {
                self.enqueue(Command::Unsubscribe {
                    actions: wire_actions(&dropped),
                    resource: resource.clone(),
                })
            })
        };
        // outside the lock: observers unregister themselves on error
        for (id, observer) in &failed {
            debug!(%resource, observer = %id, "failing observer");
            observer.error(error);
        }
        cleanup
    }

    /// Remove observer `id` from `events` on `resource`.
    ///
    /// Returns the pending unsubscribe for the event types left with no
    /// observer, or `None` when siblings still hold every type.
    pub(crate) fn detach(
        &self,
        resource: &ResourceIdentity,
        events: &[EventType],
        id: &ObserverId,
    ) -> Option<PendingReply> {
        let mut registry = self.shared.registry.lock();
        let emptied: Vec<EventType> = events
            .iter()
            .copied()
            .filter(|&event| {
                registry.remove_observer(&SubscriptionKey::new(resource.clone(), event), id)
            })
            .collect();
        if emptied.is_empty() {
            return None;
        }
        debug!(%resource, events = ?emptied, observer = %id, "unsubscribing");
        Some(self.enqueue(Command::Unsubscribe {
            actions: wire_actions(&emptied),
            resource: resource.clone(),
        }))
    }

    /// Await `reply` in the background, logging a failure instead of surfacing it.
    pub(crate) fn settle_quietly(&self, reply: PendingReply, what: &'static str) {
        let coordinator = self.clone();
        let fut = async move {
            if let Err(error) = coordinator.await_reply(reply).await {
                warn!(%error, kind = error.error_kind(), "{what} failed");
            }
        };
        // Without a runtime the command is still queued; only the log is lost.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            drop(handle.spawn(fut));
        }
    }

    // ─── Inbound ─────────────────────────────────────────────────────────

    fn handle_text(&self, text: &str) {
        match parse_inbound(text) {
            Ok(InboundMessage::CommandResponse(response)) => {
                let _ = self.shared.ledger.resolve(response);
            }
            Ok(InboundMessage::Event(event)) => self.dispatch_event(&event),
            Ok(InboundMessage::Notification(notification)) => self.refresh_token(&notification),
            Ok(InboundMessage::Unknown { kind }) => {
                debug!(%kind, "ignoring message of unknown type");
            }
            Err(error) => {
                let _ = self.shared.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(%error, "discarding malformed frame");
            }
        }
    }

    fn dispatch_event(&self, event: &ResourceEvent) {
        let key = SubscriptionKey::new(event.resource.clone(), event.action);
        let mut registry = self.shared.registry.lock();
        if registry.route(&key, event) > 0 {
            return;
        }
        let _ = self.shared.stale.fetch_add(1, Ordering::Relaxed);
        debug!(%key, "event has no live observers, unsubscribing");
        let reply = self.enqueue(Command::Unsubscribe {
            actions: vec![EventSubscription::Only(event.action)],
            resource: event.resource.clone(),
        });
        drop(registry);
        self.settle_quietly(reply, "stale unsubscribe");
    }

    fn refresh_token(&self, notification: &Notification) {
        info!(code = ?notification.code, info = %notification.info, "token refresh requested");
        let coordinator = self.clone();
        drop(tokio::spawn(async move {
            let token = match coordinator.shared.tokens.get_token().await {
                Ok(token) => token,
                Err(error) => {
                    warn!(%error, "token refresh failed");
                    return;
                }
            };
            match coordinator.send_command(Command::JwtReplace { token }).await {
                Ok(_) => debug!("token replaced"),
                Err(error) => warn!(%error, "token replacement rejected"),
            }
        }));
    }

    // ─── Diagnostics ─────────────────────────────────────────────────────

    /// Whether commands currently flow to a channel.
    pub fn is_ready(&self) -> bool {
        self.shared.gate.is_open()
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Identifier of the live channel, if any.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.shared.channel.lock().as_ref().map(|live| live.id.clone())
    }

    /// Commands sent or queued and not yet answered.
    pub fn pending_commands(&self) -> usize {
        self.shared.ledger.len()
    }

    /// Inbound frames discarded as malformed.
    pub fn malformed_messages(&self) -> u64 {
        self.shared.malformed.load(Ordering::Relaxed)
    }

    /// Inbound events that found no live observer.
    pub fn stale_events(&self) -> u64 {
        self.shared.stale.load(Ordering::Relaxed)
    }

    /// Subscription keys with at least one registered observer.
    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.shared.registry.lock().keys()
    }

    /// Observers registered under `key`.
    pub fn observers(&self, key: &SubscriptionKey) -> Vec<ObserverId> {
        self.shared.registry.lock().lookup(key)
    }

    /// Configuration in effect.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    /// Token source used for connects and refreshes.
    pub fn token_provider(&self) -> Arc<dyn TokenProvider> {
        Arc::clone(&self.shared.tokens)
    }
}

// ─── Background tasks ────────────────────────────────────────────────────

async fn run_outbox(
    shared: Weak<Shared>,
    mut gate: watch::Receiver<GateState>,
    mut outbox: mpsc::UnboundedReceiver<OutboundCommand>,
    shutdown: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            next = outbox.recv() => match next {
                Some(command) => command,
                None => return,
            },
        };
        let correlation_id = command.correlation_id();
        let alive = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                if let Some(shared) = shared.upgrade() {
                    let _ = shared.ledger.reject(correlation_id, RealtimeError::ConnectionClosed);
                }
                break;
            }
            alive = transmit(&shared, &mut gate, &command) => alive,
        };
        if !alive {
            return;
        }
    }

    outbox.close();
    if let Some(shared) = shared.upgrade() {
        while let Ok(command) = outbox.try_recv() {
            let _ = shared
                .ledger
                .reject(command.correlation_id(), RealtimeError::ConnectionClosed);
        }
    }
}

/// Send one command once the gate is open. Returns false if the coordinator is gone.
async fn transmit(
    shared: &Weak<Shared>,
    gate: &mut watch::Receiver<GateState>,
    command: &OutboundCommand,
) -> bool {
    loop {
        if !wait_ready(gate).await {
            return false;
        }
        let Some(shared) = shared.upgrade() else {
            return false;
        };
        // gate is closed before the channel is dropped, so this only spins once
        if send_now(&shared, command) {
            return true;
        }
    }
}

/// Hand `command` to the live sink. False when no channel is bound.
///
/// A subscribe holds the registry lock across the send so a concurrent
/// `start` sees its keys either still queued or already wired.
fn send_now(shared: &Shared, command: &OutboundCommand) -> bool {
    let mut registry = matches!(command.command(), Command::Subscribe { .. })
        .then(|| shared.registry.lock());
    let Some(sink) = shared.current_sink() else {
        return false;
    };

    let name = command.command().name();
    let correlation_id = command.correlation_id();
    match sink.send_text(command.payload().to_owned()) {
        Ok(()) => {
            debug!(command = name, %correlation_id, "command sent");
            if let (Some(registry), Command::Subscribe { actions, resource }) =
                (registry.as_mut(), command.command())
            {
                registry.mark_wired(resource, actions);
            }
        }
        Err(TransportError::NotOpen) => {
            warn!(command = name, %correlation_id, "send failed: socket not open");
            let _ = shared.ledger.reject(
                correlation_id,
                RealtimeError::ChannelNotOpen {
                    context: name.to_owned(),
                },
            );
        }
        Err(TransportError::Io(reason)) => {
            warn!(command = name, %correlation_id, %reason, "send failed");
            let _ = shared.ledger.reject(
                correlation_id,
                RealtimeError::Send {
                    context: name.to_owned(),
                    reason,
                },
            );
        }
    }
    true
}

async fn run_dispatcher(
    shared: Weak<Shared>,
    connection: ConnectionId,
    mut inbound: mpsc::Receiver<InboundFrame>,
) {
    while let Some(frame) = inbound.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let coordinator = Coordinator { shared };
        match frame {
            InboundFrame::Text(text) => coordinator.handle_text(&text),
            InboundFrame::Closed { clean, reason } => {
                if clean {
                    info!(%connection, ?reason, "remote closed the channel");
                } else {
                    warn!(%connection, ?reason, "channel lost");
                }
                let _ = coordinator.shared.release(Some(&connection), false);
                return;
            }
        }
    }
    if let Some(shared) = shared.upgrade() {
        let _ = shared.release(Some(&connection), false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::transport::memory::{MemoryRemote, pair};
    use crate::transport::ReadyState;
    use assert_matches::assert_matches;
    use serde_json::{Value, json};

    fn coordinator() -> Coordinator {
        Coordinator::new(CoordinatorConfig::default(), Arc::new(StaticToken::new("t0")))
    }

    fn ack(request: &Value) -> Value {
        json!({"type": "command response", "data": {"request": request, "response": {}}})
    }

    async fn started() -> (Coordinator, MemoryRemote) {
        let coordinator = coordinator();
        let (duplex, remote) = pair(16);
        let _ = coordinator.start(duplex).unwrap();
        (coordinator, remote)
    }

    #[tokio::test]
    async fn commands_queue_until_start() {
        let coordinator = coordinator();
        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .send_command(Command::Publish {
                        channel: "chat".into(),
                        data: json!("early"),
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(!coordinator.is_ready());
        assert_eq!(coordinator.pending_commands(), 1);

        let (duplex, mut remote) = pair(16);
        let _ = coordinator.start(duplex).unwrap();
        let sent = remote.recv_json().await.unwrap();
        assert_eq!(sent["data"]["arguments"]["data"], "early");

        assert!(remote.push_json(&ack(&sent)).await);
        assert!(task.await.unwrap().is_ok());
        assert_eq!(coordinator.pending_commands(), 0);
    }

    #[tokio::test]
    async fn send_on_closed_socket_is_channel_not_open() {
        let (coordinator, remote) = started().await;
        remote.set_ready_state(ReadyState::Closed);
        let err = coordinator
            .send_command(Command::JwtReplace { token: "x".into() })
            .await
            .unwrap_err();
        assert_matches!(err, RealtimeError::ChannelNotOpen { .. });
        assert!(err.to_string().contains("not open"));
    }

    #[tokio::test]
    async fn other_send_failures_are_send_errors() {
        let (coordinator, remote) = started().await;
        remote.fail_next_send(TransportError::Io("broken pipe".into()));
        let err = coordinator
            .send_command(Command::JwtReplace { token: "x".into() })
            .await
            .unwrap_err();
        assert_matches!(err, RealtimeError::Send { ref reason, .. } if reason == "broken pipe");
        assert!(!err.to_string().contains("not open"));
    }

    #[tokio::test]
    async fn malformed_frames_are_counted_and_skipped() {
        let (coordinator, mut remote) = started().await;
        assert!(remote.push(InboundFrame::Text("{not json".into())).await);
        assert!(remote.push_json(&json!({"data": {}})).await);

        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .send_command(Command::JwtReplace { token: "x".into() })
                    .await
            })
        };
        let sent = remote.recv_json().await.unwrap();
        assert!(remote.push_json(&ack(&sent)).await);
        assert!(task.await.unwrap().is_ok());
        assert_eq!(coordinator.malformed_messages(), 2);
    }

    #[tokio::test]
    async fn notification_triggers_jwt_replace() {
        let (_coordinator, mut remote) = started().await;
        assert!(
            remote
                .push_json(&json!({"type": "notification", "data": {"code": 1, "info": "expiring"}}))
                .await
        );
        let sent = remote.recv_json().await.unwrap();
        assert_eq!(sent["data"]["command"], "jwt replace");
        assert_eq!(sent["data"]["arguments"]["token"], "t0");
    }

    #[tokio::test]
    async fn clean_remote_close_resets() {
        let (coordinator, remote) = started().await;
        assert!(coordinator.is_ready());
        remote.close(true).await;
        for _ in 0..50 {
            if !coordinator.is_ready() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!coordinator.is_ready());
        assert!(coordinator.connection_id().is_none());
    }

    #[tokio::test]
    async fn restart_replaces_channel() {
        let (coordinator, _old_remote) = started().await;
        let first = coordinator.connection_id().unwrap();
        let (duplex, mut remote) = pair(16);
        let second = coordinator.start(duplex).unwrap();
        assert_ne!(first, second);

        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .send_command(Command::JwtReplace { token: "x".into() })
                    .await
            })
        };
        let sent = remote.recv_json().await.unwrap();
        assert!(remote.push_json(&ack(&sent)).await);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_hook_bounds_the_wait() {
        let config = CoordinatorConfig {
            command_timeout: Some(Duration::from_millis(250)),
        };
        let coordinator = Coordinator::new(config, Arc::new(StaticToken::new("t0")));
        let err = coordinator
            .send_command(Command::JwtReplace { token: "x".into() })
            .await
            .unwrap_err();
        assert_matches!(err, RealtimeError::Timeout { timeout_ms: 250, .. });
        assert_eq!(coordinator.pending_commands(), 0);
    }

    #[tokio::test]
    async fn shutdown_fails_pending_and_refuses_start() {
        let coordinator = coordinator();
        let reply = coordinator.enqueue(Command::JwtReplace { token: "x".into() });
        coordinator.shutdown();
        assert_matches!(reply.wait().await, Err(RealtimeError::ConnectionClosed));

        let (duplex, _remote) = pair(4);
        assert_matches!(coordinator.start(duplex), Err(RealtimeError::ConnectionClosed));

        let late = coordinator
            .send_command(Command::JwtReplace { token: "y".into() })
            .await;
        assert_matches!(late, Err(RealtimeError::ConnectionClosed));
    }
}
