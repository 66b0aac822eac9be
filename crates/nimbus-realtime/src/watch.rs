//! `watch`: subscribe to change events on a resource.
//!
//! Validation happens synchronously, before anything is registered. The
//! registry update and the subscribe command it implies are issued
//! atomically; the acknowledgement is awaited in the background. A rejection
//! is delivered on every stream sharing the rejected keys, and those keys are
//! dropped so a later `watch` subscribes afresh.

use std::sync::Arc;

use nimbus_core::{
    EventSubscription, EventType, ObserverId, RealtimeError, ResourceIdentity, ResourceType, Result,
};

use crate::coordinator::Coordinator;
use crate::registry::{Observer, emits};
use crate::stream::{self, EventStream, Registration};

/// Something that can be watched: a resource identity bound to a coordinator.
pub trait Watchable {
    /// Resource being watched.
    fn identity(&self) -> &ResourceIdentity;

    /// Coordinator the subscription goes through.
    fn coordinator(&self) -> &Coordinator;
}

/// Watch `target` for the event types named in `types`.
///
/// Accepts `"created"`, `"updated"`, `"deleted"`, `"published"` and `"all"`;
/// an empty list means `"all"`. Must be called within a Tokio runtime.
///
/// # Errors
///
/// [`RealtimeError::BadEventSubscriptionType`] for an unknown value or an
/// event type the resource kind never emits.
pub fn watch<W, I, T>(target: &W, types: I) -> Result<EventStream>
where
    W: Watchable + ?Sized,
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let requested = types
        .into_iter()
        .map(|t| t.as_ref().parse::<EventSubscription>())
        .collect::<Result<Vec<_>>>()?;
    watch_events(target, &requested)
}

/// Typed form of [`watch`].
pub fn watch_events<W>(target: &W, requested: &[EventSubscription]) -> Result<EventStream>
where
    W: Watchable + ?Sized,
{
    let resource = target.identity();
    let events = plan(resource.kind, requested)?;
    let coordinator = target.coordinator();

    let registration = Arc::new(Registration::new(
        coordinator.clone(),
        resource.clone(),
        events.clone(),
        ObserverId::new(),
    ));
    let (observer, stream) = stream::channel(Arc::clone(&registration));
    let observer: Arc<dyn Observer> = observer;

    if let Some(pending) = coordinator.attach(resource, &events, registration.observer_id(), &observer) {
        drop(tokio::spawn(coordinator.clone().confirm_subscribe(pending)));
    }
    Ok(stream)
}

/// Resolve requested subscription types to the concrete set to register.
///
/// Order follows first mention; duplicates collapse. `all` (or an empty
/// request) stands for every type `kind` emits. Every entry is validated
/// even when `all` is present.
pub fn plan(kind: ResourceType, requested: &[EventSubscription]) -> Result<Vec<EventType>> {
    let mut concrete: Vec<EventType> = Vec::with_capacity(requested.len());
    let mut wants_all = requested.is_empty();
    for entry in requested {
        match *entry {
            EventSubscription::All => wants_all = true,
            EventSubscription::Only(event) => {
                if !emits(kind, event) {
                    return Err(RealtimeError::BadEventSubscriptionType {
                        value: event.as_str().to_owned(),
                        expected: accepted_for(kind),
                    });
                }
                if !concrete.contains(&event) {
                    concrete.push(event);
                }
            }
        }
    }
    if wants_all {
        return Ok(kind.concrete_events().to_vec());
    }
    Ok(concrete)
}

fn accepted_for(kind: ResourceType) -> String {
    kind.concrete_events()
        .iter()
        .map(|event| event.as_str())
        .chain(std::iter::once("all"))
        .collect::<Vec<_>>()
        .join(", ")
}
