//! # ilam-server
//!
//! Axum HTTP + `WebSocket` relay server.
//!
//! - Connection registry: sharded `ConnectionId → RelayConnection` map
//! - Sessions: claim, read loop, frame relay, keepalive, teardown
//! - HTTP gateway: upgrade, out-of-band POST relay, status, CORS preflight
//! - Pluggable authorization hook
//! - Plain TCP or TLS listener, graceful shutdown via `CancellationToken`
//! - Prometheus metrics

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod gateway;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod status;
pub mod tls;
pub mod websocket;

pub use auth::{AllowAll, AuthError, Authorizer};
pub use config::ServerConfig;
pub use server::{RelayServer, ServerError, ServerHandle};
pub use websocket::registry::ConnectionRegistry;
