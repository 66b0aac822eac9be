//! # nimbus-core
//!
//! Shared vocabulary for the Nimbus real-time SDK.
//!
//! - **Identities**: [`ResourceIdentity`], [`SubscriptionKey`], branded IDs
//! - **Events**: [`EventType`] and the `all` meta-value [`EventSubscription`]
//! - **Protocol**: outbound [`protocol::Command`]s and inbound
//!   [`protocol::InboundMessage`]s with their wire shapes
//! - **Errors**: [`RealtimeError`] via `thiserror`
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod resource;

pub use errors::{RealtimeError, Result};
pub use events::{EventSubscription, EventType, Modifier, ResourceEvent};
pub use ids::{ConnectionId, CorrelationId, CorrelationSequence, ObserverId};
pub use resource::{ResourceIdentity, ResourceType, SubscriptionKey};
