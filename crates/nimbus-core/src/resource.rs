//! Resource identity and subscription keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::events::EventType;

/// Kind of addressable resource on the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    /// A structured dataset.
    #[serde(rename = "ds")]
    Dataset,
    /// A file collection.
    #[serde(rename = "fs")]
    Fileset,
    /// A publish/subscribe message channel.
    #[serde(rename = "channel")]
    Channel,
    /// The user collection.
    #[serde(rename = "users")]
    Users,
}

impl ResourceType {
    /// Wire value of this resource type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dataset => "ds",
            Self::Fileset => "fs",
            Self::Channel => "channel",
            Self::Users => "users",
        }
    }

    /// Concrete event types this kind of resource emits.
    ///
    /// Channels only publish; everything else reports record changes.
    pub fn concrete_events(self) -> &'static [EventType] {
        match self {
            Self::Channel => &[EventType::Published],
            Self::Dataset | Self::Fileset | Self::Users => &EventType::TRIAD,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(type, name)` pair addressing one resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// Resource kind.
    #[serde(rename = "type")]
    pub kind: ResourceType,
    /// Resource name.
    pub name: String,
}

impl ResourceIdentity {
    /// Build an identity.
    pub fn new(kind: ResourceType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Shorthand for a dataset identity.
    pub fn dataset(name: impl Into<String>) -> Self {
        Self::new(ResourceType::Dataset, name)
    }

    /// Shorthand for a fileset identity.
    pub fn fileset(name: impl Into<String>) -> Self {
        Self::new(ResourceType::Fileset, name)
    }

    /// Shorthand for a channel identity.
    pub fn channel(name: impl Into<String>) -> Self {
        Self::new(ResourceType::Channel, name)
    }

    /// Shorthand for a users identity.
    pub fn users(name: impl Into<String>) -> Self {
        Self::new(ResourceType::Users, name)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Registry key: one concrete event type on one resource.
///
/// Equality and hashing are structural, so keys built in any order compare
/// equal. [`SubscriptionKey::canonical`] is the stable string form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    /// Resource the events come from.
    pub resource: ResourceIdentity,
    /// Concrete event type (never `all`).
    pub event: EventType,
}

impl SubscriptionKey {
    /// Build a key.
    pub fn new(resource: ResourceIdentity, event: EventType) -> Self {
        Self { resource, event }
    }

    /// Stable string form, `"<type>/<name>#<event>"`.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.event)
    }
}
