//! WebSocket transport: connections, registry, keepalive, sessions and
//! event fan-out.

pub mod broadcast;
pub mod connection;
pub mod keepalive;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
