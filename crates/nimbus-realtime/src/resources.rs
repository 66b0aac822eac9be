//! Resource handles: datasets, filesets, users and channels.

use std::sync::Arc;

use async_trait::async_trait;
use nimbus_core::protocol::{Command, CommandReply};
use nimbus_core::{
    EventSubscription, EventType, Modifier, RealtimeError, ResourceIdentity, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::stream::EventStream;
use crate::watch::{Watchable, watch, watch_events};

macro_rules! record_resource {
    ($(#[$meta:meta])* $name:ident, $ctor:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name {
            identity: ResourceIdentity,
            coordinator: Coordinator,
        }

        impl $name {
            /// Handle for the resource called `name`.
            pub fn new(name: impl Into<String>, coordinator: Coordinator) -> Self {
                Self {
                    identity: ResourceIdentity::$ctor(name),
                    coordinator,
                }
            }

            /// Resource name.
            pub fn name(&self) -> &str {
                &self.identity.name
            }

            /// Watch for `created`, `updated`, `deleted` or `all` events.
            pub fn watch<I, T>(&self, types: I) -> Result<EventStream>
            where
                I: IntoIterator<Item = T>,
                T: AsRef<str>,
            {
                watch(self, types)
            }
        }

        impl Watchable for $name {
            fn identity(&self) -> &ResourceIdentity {
                &self.identity
            }

            fn coordinator(&self) -> &Coordinator {
                &self.coordinator
            }
        }
    };
}

record_resource!(
    /// A structured dataset.
    Dataset,
    dataset
);
record_resource!(
    /// A file collection.
    Fileset,
    fileset
);
record_resource!(
    /// A user collection.
    Users,
    users
);

/// Query for a channel's message history.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    /// Only messages at or after this timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    /// Only messages before this timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    /// At most this many messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl LogFilter {
    /// Set the lower time bound.
    #[must_use]
    pub fn since(mut self, timestamp: impl Into<String>) -> Self {
        self.since = Some(timestamp.into());
        self
    }

    /// Set the upper time bound.
    #[must_use]
    pub fn until(mut self, timestamp: impl Into<String>) -> Self {
        self.until = Some(timestamp.into());
        self
    }

    /// Cap the number of messages.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One message from a channel's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Who published it.
    #[serde(default)]
    pub modifier: Modifier,
    /// When it was published.
    #[serde(default)]
    pub timestamp: Value,
    /// Message body.
    #[serde(default)]
    pub data: Value,
}

/// Retrieves channel history (the REST side of the platform).
#[async_trait]
pub trait ChannelLogSource: Send + Sync {
    /// Messages on `channel` matching `filter`, oldest first.
    async fn fetch_log(&self, channel: &str, filter: &LogFilter) -> Result<Vec<ChannelMessage>>;
}

/// A publish/subscribe channel.
#[derive(Clone)]
pub struct Channel {
    identity: ResourceIdentity,
    coordinator: Coordinator,
    log_source: Option<Arc<dyn ChannelLogSource>>,
}

impl Channel {
    /// Handle for the channel called `name`, without history access.
    pub fn new(name: impl Into<String>, coordinator: Coordinator) -> Self {
        Self {
            identity: ResourceIdentity::channel(name),
            coordinator,
            log_source: None,
        }
    }

    /// Enable [`get_log`](Self::get_log) through `source`.
    #[must_use]
    pub fn with_log_source(mut self, source: Arc<dyn ChannelLogSource>) -> Self {
        self.log_source = Some(source);
        self
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Stream of messages published on this channel.
    pub fn subscribe(&self) -> Result<EventStream> {
        watch_events(self, &[EventSubscription::Only(EventType::Published)])
    }

    /// Publish `data` and wait for the acknowledgement.
    pub async fn publish<T>(&self, data: &T) -> Result<CommandReply>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_value(data)?;
        self.coordinator
            .send_command(Command::Publish {
                channel: self.identity.name.clone(),
                data,
            })
            .await
    }

    /// Message history matching `filter`.
    pub async fn get_log(&self, filter: &LogFilter) -> Result<Vec<ChannelMessage>> {
        let Some(source) = &self.log_source else {
            return Err(RealtimeError::Unsupported("channel log".into()));
        };
        source.fetch_log(&self.identity.name, filter).await
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("identity", &self.identity)
            .field("has_log_source", &self.log_source.is_some())
            .finish_non_exhaustive()
    }
}

impl Watchable for Channel {
    fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }
}
