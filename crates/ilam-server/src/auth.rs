//! Authorization hook.
//!
//! Called before every upgrade and every out-of-band POST. The relay only
//! defines the contract; credentials and policy belong to the embedder.

use async_trait::async_trait;
use axum::http::request::Parts;
use ilam_core::{ConnectionId, RelayError};
use thiserror::Error;

use crate::server::ServerHandle;

/// Rejection from an [`Authorizer`]. The message is returned to the client.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AuthError {
    message: String,
}

impl AuthError {
    /// Create a rejection with a client-facing message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The client-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<AuthError> for RelayError {
    fn from(err: AuthError) -> Self {
        Self::AuthorizationDenied(err.message)
    }
}

/// Decides whether a request may act as (upgrade) or send to (POST) `id`.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    /// `Ok(())` lets the request through; `Err` answers `401`.
    async fn authorize(
        &self,
        server: &ServerHandle,
        request: &Parts,
        id: ConnectionId,
    ) -> Result<(), AuthError>;
}

/// Default authorizer: lets everything through.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(
        &self,
        _server: &ServerHandle,
        _request: &Parts,
        _id: ConnectionId,
    ) -> Result<(), AuthError> {
        Ok(())
    }
}

#[async_trait]
impl<F> Authorizer for F
where
    F: Fn(&ServerHandle, &Parts, ConnectionId) -> Result<(), AuthError> + Send + Sync + 'static,
{
    async fn authorize(
        &self,
        server: &ServerHandle,
        request: &Parts,
        id: ConnectionId,
    ) -> Result<(), AuthError> {
        self(server, request, id)
    }
}
