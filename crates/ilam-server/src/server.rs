//! `RelayServer`: binds the listener and serves the gateway router.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::auth::{AllowAll, Authorizer};
use crate::config::ServerConfig;
use crate::gateway::{self, AppState};
use crate::shutdown::ShutdownCoordinator;
use crate::status::{StatusSnapshot, status_snapshot};
use crate::tls::{HANDSHAKE_TIMEOUT, TlsError, TlsListener, load_tls_config};
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::SessionContext;

/// Server-side view handed to authorizers.
#[derive(Clone)]
pub struct ServerHandle {
    registry: Arc<ConnectionRegistry>,
    started_at: Instant,
}

impl ServerHandle {
    /// Create a handle over `registry`, starting the uptime clock now.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            started_at: Instant::now(),
        }
    }

    /// Live connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Current status snapshot.
    pub fn stats(&self) -> StatusSnapshot {
        status_snapshot(self.started_at, self.registry.count())
    }
}

/// Errors starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Configured address.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// TLS material could not be loaded.
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    handle: ServerHandle,
    authorizer: Arc<dyn Authorizer>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl RelayServer {
    /// Create a server that authorizes every request.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            handle: ServerHandle::new(Arc::new(ConnectionRegistry::new())),
            authorizer: Arc::new(AllowAll),
            shutdown: Arc::new(ShutdownCoordinator::new()),
        }
    }

    /// Replace the authorization hook.
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: impl Authorizer) -> Self {
        self.authorizer = Arc::new(authorizer);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        gateway::router(self.app_state())
    }

    fn app_state(&self) -> AppState {
        let session = SessionContext {
            registry: Arc::clone(self.handle.registry()),
            heartbeat_interval: self.config.heartbeat_interval(),
            idle_timeout: self.config.idle_timeout(),
            send_queue_capacity: self.config.send_queue_capacity,
            shutdown: self.shutdown.token(),
        };
        AppState {
            handle: self.handle.clone(),
            authorizer: Arc::clone(&self.authorizer),
            config: Arc::clone(&self.config),
            session: Arc::new(session),
        }
    }

    /// Live connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.handle.registry()
    }

    /// Handle given to authorizers.
    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shutdown coordinator. Cancelling it stops the listener and closes
    /// every session.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Bind the configured address and start serving on a background task.
    ///
    /// Returns the bound address (useful with port 0) and the serve task,
    /// which finishes after shutdown.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let acceptor = match self.config.tls_paths() {
            Some((cert, key)) => Some(TlsAcceptor::from(load_tls_config(cert, key)?)),
            None => None,
        };

        let bind_err = |source| ServerError::Bind {
            addr: self.config.addr.clone(),
            source,
        };
        let tcp = TcpListener::bind(self.config.addr.as_str()).await.map_err(bind_err)?;
        let addr = tcp.local_addr().map_err(bind_err)?;

        let router = self.router();
        let token = self.shutdown.token();

        let handle = match acceptor {
            Some(acceptor) => {
                let listener = TlsListener::new(tcp, acceptor, HANDSHAKE_TIMEOUT).map_err(bind_err)?;
                info!(%addr, "relay listening (tls)");
                tokio::spawn(async move {
                    let result = axum::serve(listener, router)
                        .with_graceful_shutdown(shutdown_signal(token))
                        .await;
                    if let Err(error) = result {
                        error!(%error, "server error");
                    }
                })
            }
            None => {
                info!(%addr, "relay listening");
                tokio::spawn(async move {
                    let result = axum::serve(tcp, router)
                        .with_graceful_shutdown(shutdown_signal(token))
                        .await;
                    if let Err(error) = result {
                        error!(%error, "server error");
                    }
                })
            }
        };

        Ok((addr, handle))
    }
}

async fn shutdown_signal(token: CancellationToken) {
    token.cancelled().await;
    info!("listener shutting down");
}
