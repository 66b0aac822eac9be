//! Subscription registry: which observers want which events.
//!
//! Entries are keyed by [`SubscriptionKey`] (one concrete event type on one
//! resource). The registry holds observers weakly; the owning stream keeps
//! them alive, and a stream that vanished without cleanup simply stops
//! counting as live.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};

use nimbus_core::{
    EventSubscription, EventType, ObserverId, RealtimeError, ResourceEvent, ResourceIdentity,
    ResourceType, Result, SubscriptionKey,
};
use tracing::warn;

/// A sink for resource events.
pub trait Observer: Send + Sync {
    /// Deliver one event. An error affects only this observer.
    fn next(&self, event: &ResourceEvent) -> Result<()>;

    /// Terminal failure.
    fn error(&self, err: &RealtimeError);

    /// Orderly end of the stream.
    fn complete(&self);
}

struct ObserverSlot {
    id: ObserverId,
    observer: Weak<dyn Observer>,
}

#[derive(Default)]
struct Entry {
    slots: Vec<ObserverSlot>,
    // a subscribe for this key reached some channel and no newer one is queued
    wired: bool,
}

/// Observers per subscription key.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionKey, Entry>,
}

impl SubscriptionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` under `key`.
    ///
    /// Returns true when this created the entry, i.e. the key needs a wire
    /// subscription. Adding the same observer id twice is a no-op.
    pub fn add_observer(&mut self, key: SubscriptionKey, id: &ObserverId, observer: &Arc<dyn Observer>) -> bool {
        let mut created = false;
        let entry = self.entries.entry(key).or_insert_with(|| {
            created = true;
            Entry::default()
        });
        if !entry.slots.iter().any(|slot| &slot.id == id) {
            entry.slots.push(ObserverSlot {
                id: id.clone(),
                observer: Arc::downgrade(observer),
            });
        }
        created
    }

    /// Remove the observer `id` from `key`.
    ///
    /// Returns true when the entry is now empty and was deleted, i.e. the key
    /// no longer needs a wire subscription. An unknown key or id returns false.
    pub fn remove_observer(&mut self, key: &SubscriptionKey, id: &ObserverId) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        let before = entry.slots.len();
        entry.slots.retain(|slot| &slot.id != id);
        if entry.slots.len() == before {
            return false;
        }
        if entry.slots.is_empty() {
            let _ = self.entries.remove(key);
            return true;
        }
        false
    }

    /// Delete the entry for `key` and return its live observers, or `None`
    /// when there was no entry.
    pub fn remove_key(&mut self, key: &SubscriptionKey) -> Option<Vec<(ObserverId, Arc<dyn Observer>)>> {
        let entry = self.entries.remove(key)?;
        Some(
            entry
                .slots
                .into_iter()
                .filter_map(|slot| slot.observer.upgrade().map(|observer| (slot.id, observer)))
                .collect(),
        )
    }

    /// Offer `event` to every live observer under `key`.
    ///
    /// Returns how many live observers were reached. A failing observer is
    /// logged and does not stop delivery to the rest. Slots whose observer is
    /// gone are pruned, and an entry left with nothing live is deleted.
    pub fn route(&mut self, key: &SubscriptionKey, event: &ResourceEvent) -> usize {
        let Some(entry) = self.entries.get_mut(key) else {
            return 0;
        };
        let mut reached = 0;
        entry.slots.retain(|slot| {
            let Some(observer) = slot.observer.upgrade() else {
                return false;
            };
            reached += 1;
            if let Err(error) = observer.next(event) {
                warn!(observer = %slot.id, key = %key, %error, "observer rejected event");
            }
            true
        });
        if entry.slots.is_empty() {
            let _ = self.entries.remove(key);
        }
        reached
    }

    /// Record that a subscribe for `actions` on `resource` went out on a channel.
    pub fn mark_wired(&mut self, resource: &ResourceIdentity, actions: &[EventSubscription]) {
        for action in actions {
            let events: &[EventType] = match action {
                EventSubscription::All => resource.kind.concrete_events(),
                EventSubscription::Only(event) => std::slice::from_ref(event),
            };
            for event in events {
                if let Some(entry) = self.entries.get_mut(&SubscriptionKey::new(resource.clone(), *event)) {
                    entry.wired = true;
                }
            }
        }
    }

    /// Whether a subscribe for `key` has gone out on a channel.
    pub fn is_wired(&self, key: &SubscriptionKey) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.wired)
    }

    /// Keys whose subscribe went out on an earlier channel, grouped by
    /// resource and cleared so the caller can queue them again.
    ///
    /// Keys whose subscribe is still queued are left alone.
    pub fn take_wired(&mut self) -> Vec<(ResourceIdentity, Vec<EventType>)> {
        let mut grouped: BTreeMap<ResourceIdentity, Vec<EventType>> = BTreeMap::new();
        for (key, entry) in &mut self.entries {
            if std::mem::take(&mut entry.wired) {
                grouped.entry(key.resource.clone()).or_default().push(key.event);
            }
        }
        grouped
            .into_iter()
            .map(|(resource, mut events)| {
                events.sort();
                (resource, events)
            })
            .collect()
    }

    /// Observer ids registered under `key`, in registration order.
    pub fn lookup(&self, key: &SubscriptionKey) -> Vec<ObserverId> {
        self.entries
            .get(key)
            .map(|entry| entry.slots.iter().map(|slot| slot.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether `key` has an entry.
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Every key with an entry, sorted.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of keys with an entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry and complete each live observer once.
    pub fn complete_all(&mut self) -> usize {
        let mut seen = HashSet::new();
        let mut completed = 0;
        for (_, entry) in self.entries.drain() {
            for slot in entry.slots {
                if !seen.insert(slot.id) {
                    continue;
                }
                if let Some(observer) = slot.observer.upgrade() {
                    observer.complete();
                    completed += 1;
                }
            }
        }
        completed
    }
}

/// `action` argument for a subscribe or unsubscribe covering `events`.
///
/// Collapses to `["all"]` exactly when `events` is the full
/// created/updated/deleted triad; otherwise lists `events` as given.
pub fn wire_actions(events: &[EventType]) -> Vec<EventSubscription> {
    let distinct: HashSet<EventType> = events.iter().copied().collect();
    let is_triad = distinct.len() == EventType::TRIAD.len() && EventType::TRIAD.iter().all(|e| distinct.contains(e));
    if is_triad {
        vec![EventSubscription::All]
    } else {
        events.iter().copied().map(EventSubscription::Only).collect()
    }
}

/// Whether a resource of `kind` can emit `event`.
pub fn emits(kind: ResourceType, event: EventType) -> bool {
    kind.concrete_events().contains(&event)
}
