//! WebSocket sessions, registry, heartbeat handling, and broadcasting.

pub mod broadcast;
pub mod frame;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
