//! WebSocket transport: per-client connection state, liveness, message
//! dispatch and the session loop that ties them together.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
