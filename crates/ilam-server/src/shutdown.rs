//! Shutdown coordination.
//!
//! One [`CancellationToken`] stops the listener and every live session.
//! Sessions close their sockets with "going away" and release their ids;
//! [`ShutdownCoordinator::graceful_shutdown`] waits for that to happen.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::registry::ConnectionRegistry;

/// Wait this long for sessions and tasks unless told otherwise.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the registry is polled while draining.
const DRAIN_POLL: Duration = Duration::from_millis(25);

/// Owner of the server-wide shutdown token.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator whose token is not yet cancelled.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop accepting connections and close every session.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Shut down, then wait up to `timeout` for the registry to empty and
    /// for `handles` to finish. Tasks still running at the deadline are
    /// aborted.
    ///
    /// Returns the number of connections still registered at the end.
    pub async fn graceful_shutdown(
        &self,
        registry: &ConnectionRegistry,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> usize {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(
            connections = registry.count(),
            tasks = handles.len(),
            timeout_secs = timeout.as_secs(),
            "draining"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = async {
            let _ = join_all(handles).await;
            while !registry.is_empty() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                ?timeout,
                connections = registry.count(),
                "drain timed out, aborting remaining tasks"
            );
            for handle in aborts {
                handle.abort();
            }
            // Whatever is left will never send a close frame now
            registry.close_all();
        }
        registry.count()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
