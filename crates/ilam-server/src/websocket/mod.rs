//! WebSocket connection management: registry, sessions, relay dispatch and
//! idle detection.

pub mod connection;
pub mod handler;
pub mod idle;
pub mod registry;
pub mod session;
