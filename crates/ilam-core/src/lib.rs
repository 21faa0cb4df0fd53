//! # ilam-core
//!
//! Foundation types shared by every ilam crate:
//!
//! - **Connection IDs**: [`ConnectionId`], the `u64` address of a live relay connection
//! - **Relay frames**: [`frame::RelayFrame`] and the binary codec clients use to
//!   address a payload to another connection
//! - **Errors**: [`RelayError`] taxonomy via `thiserror`
//! - **Logging**: `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod frame;
pub mod ids;
pub mod logging;

pub use errors::{ProtocolError, RelayError};
pub use frame::{DecodeError, RelayFrame};
pub use ids::{ConnectionId, InvalidConnectionId};
