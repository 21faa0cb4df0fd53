//! Error taxonomy for the relay.
//!
//! - [`ProtocolError`]: a client broke the wire contract (bad frame, bad id,
//!   text on a binary-only channel). Always ends the offending session.
//! - [`RelayError`]: everything that can go wrong while serving one request or
//!   session. Nothing here is process-fatal.
//!
//! [`RelayError::status_code`] gives the HTTP status used when the error
//! surfaces over HTTP.

use thiserror::Error;

use crate::frame::DecodeError;
use crate::ids::{ConnectionId, InvalidConnectionId};

/// A client violated the relay protocol.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Binary message is not a usable relay frame.
    #[error(transparent)]
    Frame(#[from] DecodeError),
    /// Request path does not name a connection id.
    #[error(transparent)]
    InvalidId(#[from] InvalidConnectionId),
    /// A text message arrived; the relay channel is binary-only.
    #[error("text messages are not accepted")]
    TextMessage,
}

/// Errors raised while serving a relay request or session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Client protocol violation.
    #[error("protocol error: {0}")]
    ClientProtocol(#[from] ProtocolError),

    /// The authorization hook rejected the request.
    #[error("{0}")]
    AuthorizationDenied(String),

    /// Another session already owns this id.
    #[error("connection {0} is already claimed")]
    DuplicateIdentifier(ConnectionId),

    /// No live session under this id.
    #[error("connection {0} is not live")]
    TargetUnavailable(ConnectionId),

    /// The connection cap has been reached.
    #[error("connection limit of {limit} reached")]
    TooManyConnections {
        /// Configured maximum.
        limit: usize,
    },

    /// Reading from or writing to a connection failed.
    #[error("transport failure: {message}")]
    Transport {
        /// Human-readable cause.
        message: String,
    },
}

impl RelayError {
    /// Create a transport error from any displayable cause.
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: cause.to_string(),
        }
    }

    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ClientProtocol(_) => 400,
            Self::AuthorizationDenied(_) => 401,
            Self::TargetUnavailable(_) => 404,
            Self::DuplicateIdentifier(_) => 409,
            Self::TooManyConnections { .. } => 429,
            Self::Transport { .. } => 500,
        }
    }

    /// Short machine-readable label, used as a log field and metric label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientProtocol(_) => "client_protocol",
            Self::AuthorizationDenied(_) => "authorization_denied",
            Self::DuplicateIdentifier(_) => "duplicate_identifier",
            Self::TargetUnavailable(_) => "target_unavailable",
            Self::TooManyConnections { .. } => "too_many_connections",
            Self::Transport { .. } => "transport",
        }
    }
}
