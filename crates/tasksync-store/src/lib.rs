//! # tasksync-store
//!
//! Shared state that outlives a single connection:
//!
//! - [`PresenceStore`]: per-workspace online status with sliding TTL
//! - [`HistoryStore`]: newest-first capped ring of broadcast envelopes
//!
//! Both traits have an in-process implementation ([`MemoryPresenceStore`],
//! [`MemoryHistoryStore`]) and a Redis-backed one ([`RedisStore`]) that lets
//! several server instances share the same view. Store failures never
//! surface to callers; they are logged and degrade to `false` or empty.

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod redis_store;
pub mod traits;

pub use errors::StoreError;
pub use memory::{MemoryHistoryStore, MemoryPresenceStore};
pub use redis_store::RedisStore;
pub use traits::{HistoryStore, PresenceStore};
