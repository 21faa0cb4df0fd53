//! Idle timeout for relay connections.

use std::time::Duration;

use tokio::time;

use super::connection::RelayConnection;

/// How [`watch_idle`] finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleOutcome {
    /// Nothing arrived from the client for the whole timeout.
    TimedOut,
    /// The connection closed first.
    Closed,
}

/// Wait until `connection` has been silent for `timeout`, or has closed.
///
/// Sleeps until the earliest moment the timeout could expire, then re-reads
/// the last activity time, so a busy connection costs one timer per
/// `timeout` rather than one per message.
pub async fn watch_idle(connection: &RelayConnection, timeout: Duration) -> IdleOutcome {
    loop {
        let idle = connection.idle_for();
        if idle >= timeout {
            return IdleOutcome::TimedOut;
        }
        tokio::select! {
            () = connection.closed() => return IdleOutcome::Closed,
            () = time::sleep(timeout - idle) => {}
        }
    }
}
