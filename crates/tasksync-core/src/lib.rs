//! # tasksync-core
//!
//! Shared vocabulary for the tasksync crates:
//!
//! - **Branded IDs**: `WorkspaceId`, `UserId`, `ConnectionId` as newtypes
//! - **Envelopes**: inbound messages, success/error envelopes, bus events
//! - **Keys**: deterministic broker channel and shared-store key names
//! - **Presence**: the `PresenceStatus` enum stored per workspace member
//! - **Fanout**: origin tracking and the echo exclusion policy
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod envelope;
pub mod fanout;
pub mod ids;
pub mod keys;
pub mod logging;
pub mod presence;

pub use envelope::{BusEvent, Envelope, ErrorEnvelope, EventEnvelope, InboundMessage};
pub use fanout::{ExclusionPolicy, Identity, Origin};
pub use ids::{ConnectionId, UserId, WorkspaceId};
pub use presence::PresenceStatus;
