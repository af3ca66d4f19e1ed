//! # tasksync-server
//!
//! Per-process fanout core and its WebSocket front door.
//!
//! - [`registry`]: live connections indexed by workspace, user and id
//! - [`router`]: typed inbound messages dispatched to handlers
//! - [`hub`]: wires registry, bus and stores; cross-instance delivery
//! - [`websocket`]: per-socket session, outbound queue, heartbeat
//! - [`server`]: axum routes (`/ws/{workspace_id}`, health, metrics,
//!   presence, history) and graceful start/stop

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod transport;
pub mod websocket;

pub use config::ServerConfig;
pub use hub::{CollabHub, HubConfig};
pub use registry::{ConnectionRegistry, Exclusion, RegistryError};
pub use router::EventRouter;
pub use server::{ServerHandle, SyncServer};
pub use transport::{Transport, TransportError};
