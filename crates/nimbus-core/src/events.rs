//! Event subscription types and inbound resource events.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::RealtimeError;
use crate::resource::ResourceIdentity;

/// Accepted `watch` arguments, for error messages.
const ACCEPTED: &str = "created, updated, deleted, published, all";

/// A concrete class of change on a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// A record was created.
    Created,
    /// A record was updated.
    Updated,
    /// A record was deleted.
    Deleted,
    /// A message was published on a channel.
    Published,
}

impl EventType {
    /// The record-change triad that `all` stands for on datasets, filesets and users.
    pub const TRIAD: [EventType; 3] = [EventType::Created, EventType::Updated, EventType::Deleted];

    /// Wire value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Published => "published",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            "published" => Ok(Self::Published),
            other => Err(RealtimeError::BadEventSubscriptionType {
                value: other.to_owned(),
                expected: ACCEPTED.to_owned(),
            }),
        }
    }
}

/// What a caller asks to watch: one concrete type, or the `all` meta-value.
///
/// Serialized as its wire string (`"created"`, ..., `"all"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventSubscription {
    /// Every event type the resource emits.
    All,
    /// A single concrete event type.
    Only(EventType),
}

impl EventSubscription {
    /// Wire value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Only(event) => event.as_str(),
        }
    }
}

impl From<EventType> for EventSubscription {
    fn from(event: EventType) -> Self {
        Self::Only(event)
    }
}

impl fmt::Display for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSubscription {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Only)
        }
    }
}

impl TryFrom<String> for EventSubscription {
    type Error = RealtimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventSubscription> for String {
    fn from(value: EventSubscription) -> Self {
        value.as_str().to_owned()
    }
}

/// Who made a change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifier {
    /// Modifier identifier.
    #[serde(default)]
    pub id: String,
    /// Modifier kind (user, service, ...).
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A change notification pushed by the remote.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    /// What happened.
    pub action: EventType,
    /// Where it happened.
    pub resource: ResourceIdentity,
    /// Who did it.
    #[serde(default)]
    pub modifier: Modifier,
    /// When it happened, exactly as sent by the remote.
    #[serde(default)]
    pub timestamp: serde_json::Value,
    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Value,
}
