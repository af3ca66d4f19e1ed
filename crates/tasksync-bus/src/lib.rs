//! # tasksync-bus
//!
//! Best-effort publish/subscribe between server instances.
//!
//! [`BroadcastBus`] owns one background task per subscribed channel and
//! feeds every decoded message to a [`ChannelHandler`]. The wire is behind
//! the [`Broker`] trait:
//!
//! - [`RedisBroker`]: Redis `PUBLISH` / `SUBSCRIBE`, shared by many nodes
//! - [`MemoryBroker`]: tokio broadcast channels on a shared
//!   [`MemoryExchange`], for single-node deployments and tests
//!
//! Delivery is at-most-once. Publish failures are logged and reported as
//! zero subscribers; they never propagate.

#![deny(unsafe_code)]

pub mod broker;
pub mod bus;
pub mod errors;
pub mod memory;
pub mod metrics;
pub mod redis_broker;

pub use broker::{Broker, MessageStream};
pub use bus::{BroadcastBus, ChannelHandler};
pub use errors::BusError;
pub use memory::{MemoryBroker, MemoryExchange};
pub use redis_broker::RedisBroker;
