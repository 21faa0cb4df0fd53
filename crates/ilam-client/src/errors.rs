//! Client error types.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors from talking to the relay.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The relay URL could not be parsed or converted.
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
    /// WebSocket handshake or transport failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),
    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The relay answered an HTTP request with a non-success status.
    #[error("relay returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (usually `{"error": "..."}`).
        body: String,
    },
}

impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl ClientError {
    /// HTTP status for [`ClientError::Status`], or the status of a rejected
    /// WebSocket handshake.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::WebSocket(err) => match err.as_ref() {
                tungstenite::Error::Http(response) => Some(response.status().as_u16()),
                _ => None,
            },
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            Self::InvalidUrl(_) => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
