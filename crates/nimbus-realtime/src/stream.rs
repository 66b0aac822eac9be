//! Caller-facing event stream returned by `watch`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use nimbus_core::{
    EventType, ObserverId, RealtimeError, ResourceEvent, ResourceIdentity, Result,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::coordinator::Coordinator;
use crate::registry::Observer;

enum Terminal {
    Error(RealtimeError),
    Complete,
}

/// Registry-facing half of a stream.
pub(crate) struct StreamObserver {
    events: mpsc::UnboundedSender<ResourceEvent>,
    terminal: Mutex<Option<oneshot::Sender<Terminal>>>,
    registration: Weak<Registration>,
}

impl StreamObserver {
    fn finish(&self, terminal: Terminal) {
        if let Some(tx) = self.terminal.lock().take() {
            let _ = tx.send(terminal);
        }
    }
}

impl Observer for StreamObserver {
    fn next(&self, event: &ResourceEvent) -> Result<()> {
        self.events
            .send(event.clone())
            .map_err(|_| RealtimeError::ObserverClosed)
    }

    fn error(&self, err: &RealtimeError) {
        self.finish(Terminal::Error(err.clone()));
        // a failed stream holds no key, including ones other subscribes covered
        if let Some(registration) = self.registration.upgrade() {
            registration.release();
        }
    }

    fn complete(&self) {
        self.finish(Terminal::Complete);
    }
}

/// What a stream is registered for, and whether it still is.
///
/// Exactly one of cancellation or a failed subscribe gets to undo the
/// registration.
pub(crate) struct Registration {
    coordinator: Coordinator,
    resource: ResourceIdentity,
    events: Vec<EventType>,
    observer_id: ObserverId,
    active: AtomicBool,
}

impl Registration {
    pub(crate) fn new(
        coordinator: Coordinator,
        resource: ResourceIdentity,
        events: Vec<EventType>,
        observer_id: ObserverId,
    ) -> Self {
        Self {
            coordinator,
            resource,
            events,
            observer_id,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn observer_id(&self) -> &ObserverId {
        &self.observer_id
    }

    /// Claim the right to undo the registration. True for the first caller only.
    fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the observer now and unsubscribe emptied keys in the background.
    pub(crate) fn release(&self) {
        if !self.deactivate() {
            return;
        }
        if let Some(reply) = self
            .coordinator
            .detach(&self.resource, &self.events, &self.observer_id)
        {
            self.coordinator.settle_quietly(reply, "unsubscribe");
        }
    }
}

/// Create an observer and its stream.
pub(crate) fn channel(registration: Arc<Registration>) -> (Arc<StreamObserver>, EventStream) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (terminal_tx, terminal_rx) = oneshot::channel();
    let observer = Arc::new(StreamObserver {
        events: events_tx,
        terminal: Mutex::new(Some(terminal_tx)),
        registration: Arc::downgrade(&registration),
    });
    let stream = EventStream {
        _observer: Arc::clone(&observer),
        events: events_rx,
        terminal: Some(terminal_rx),
        registration,
        done: false,
    };
    (observer, stream)
}

/// Events for one `watch` call.
///
/// Yields `Ok(event)` for each matching event, in arrival order and without
/// loss. A failed subscription yields one `Err` and then ends; a client
/// shutdown ends the stream. Dropping the stream, or calling
/// [`cancel`](Self::cancel), unregisters it; the wire unsubscribe (if this
/// was the last observer) is sent in the background.
pub struct EventStream {
    // keeps the registry's weak reference alive
    _observer: Arc<StreamObserver>,
    events: mpsc::UnboundedReceiver<ResourceEvent>,
    terminal: Option<oneshot::Receiver<Terminal>>,
    registration: Arc<Registration>,
    done: bool,
}

impl EventStream {
    /// Identity of this stream's observer.
    pub fn id(&self) -> &ObserverId {
        &self.registration.observer_id
    }

    /// Resource being watched.
    pub fn resource(&self) -> &ResourceIdentity {
        &self.registration.resource
    }

    /// Concrete event types being watched.
    pub fn events(&self) -> &[EventType] {
        &self.registration.events
    }

    /// Whether the stream is still registered.
    pub fn is_active(&self) -> bool {
        self.registration.is_active()
    }

    /// Unregister now. Equivalent to dropping the stream.
    pub fn cancel(self) {
        drop(self);
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("id", self.id())
            .field("resource", self.resource())
            .field("events", &self.events())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Stream for EventStream {
    type Item = Result<ResourceEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }
        // the sender lives in `_observer`, so this never reports closed
        if let Poll::Ready(Some(event)) = this.events.poll_recv(cx) {
            return Poll::Ready(Some(Ok(event)));
        }
        let Some(terminal) = this.terminal.as_mut() else {
            return Poll::Pending;
        };
        match Pin::new(terminal).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(outcome) => {
                this.terminal = None;
                this.done = true;
                match outcome {
                    Ok(Terminal::Error(err)) => Poll::Ready(Some(Err(err))),
                    Ok(Terminal::Complete) | Err(_) => Poll::Ready(None),
                }
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.registration.release();
    }
}
