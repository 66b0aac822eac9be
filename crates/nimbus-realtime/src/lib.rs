//! # nimbus-realtime
//!
//! Real-time subscription engine for the Nimbus SDK.
//!
//! - [`RealtimeClient`] connects, disconnects and hands out resource handles
//! - [`watch`] / [`Dataset::watch`] / [`Channel::subscribe`] return an
//!   [`EventStream`]; overlapping watches share one wire subscription per
//!   event type
//! - [`Coordinator`] owns the registry, the pending-command ledger and the
//!   live channel
//! - [`transport`] abstracts the duplex channel (WebSocket, in-memory)

#![deny(unsafe_code)]

pub mod auth;
pub mod client;
pub mod coordinator;
pub mod gate;
pub mod ledger;
pub mod registry;
pub mod resources;
pub mod stream;
pub mod transport;
pub mod watch;

pub use auth::{StaticToken, TokenProvider};
pub use client::{RealtimeClient, connection_url};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use registry::{Observer, SubscriptionRegistry};
pub use resources::{
    Channel, ChannelLogSource, ChannelMessage, Dataset, Fileset, LogFilter, Users,
};
pub use stream::EventStream;
pub use watch::{Watchable, watch, watch_events};

pub use nimbus_core::{
    EventSubscription, EventType, RealtimeError, ResourceEvent, ResourceIdentity, ResourceType,
    Result, SubscriptionKey,
};
