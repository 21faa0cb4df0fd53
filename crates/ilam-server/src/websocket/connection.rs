//! Live relay connection handle.
//!
//! The session's writer task owns the socket sink. Everyone else (the
//! registry, other sessions forwarding frames, the HTTP gateway) writes
//! through a [`RelayConnection`], which only enqueues onto a bounded channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::CloseFrame;
use bytes::Bytes;
use ilam_core::ConnectionId;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Why a payload could not be queued for a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SendError {
    /// The outbound queue is at capacity.
    #[error("send queue is full")]
    QueueFull,
    /// The connection is shutting down or gone.
    #[error("connection is closed")]
    Closed,
}

/// A connected relay client, addressable by its [`ConnectionId`].
pub struct RelayConnection {
    id: ConnectionId,
    /// Outbound binary payloads, drained by the writer task.
    tx: mpsc::Sender<Bytes>,
    /// Cancelled once the connection should stop.
    close: CancellationToken,
    /// Frame the writer sends when it shuts the socket.
    close_frame: Mutex<Option<CloseFrame>>,
    /// When this connection was established.
    connected_at: Instant,
    /// When the last inbound message arrived. Tokio's clock, so idle
    /// detection follows paused time in tests.
    last_activity: Mutex<time::Instant>,
    /// Payloads rejected because the queue was full or closed.
    dropped_messages: AtomicU64,
}

impl RelayConnection {
    /// Create a connection around an existing sender.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Bytes>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            close: CancellationToken::new(),
            close_frame: Mutex::new(None),
            connected_at: now,
            last_activity: Mutex::new(time::Instant::now()),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a connection and the receiver its writer task drains.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, tx), rx)
    }

    /// The id this connection is registered under.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a binary payload for delivery. Never waits.
    pub fn send(&self, payload: Bytes) -> Result<(), SendError> {
        if self.close.is_cancelled() {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            return Err(SendError::Closed);
        }
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                match err {
                    TrySendError::Full(_) => Err(SendError::QueueFull),
                    TrySendError::Closed(_) => Err(SendError::Closed),
                }
            }
        }
    }

    /// Ask the writer task to close the socket. Idempotent.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Close with a specific close frame. The first frame set wins.
    pub fn close_with(&self, code: u16, reason: &'static str) {
        {
            let mut frame = self.close_frame.lock();
            if frame.is_none() && !self.close.is_cancelled() {
                *frame = Some(CloseFrame {
                    code,
                    reason: reason.into(),
                });
            }
        }
        self.close();
    }

    /// Take the close frame set by [`close_with`](Self::close_with), if any.
    pub fn take_close_frame(&self) -> Option<CloseFrame> {
        self.close_frame.lock().take()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.close.cancelled().await;
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_activity.lock() = time::Instant::now();
    }

    /// Time since the last inbound message (or since connecting).
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Total payloads dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("dropped_messages", &self.drop_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (RelayConnection, mpsc::Receiver<Bytes>) {
        RelayConnection::channel(ConnectionId::new(1), 32)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id(), ConnectionId::new(1));
        assert!(!conn.is_closed());
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection();
        conn.send(Bytes::from_static(b"hello")).unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(&msg[..], b"hello");
    }

    #[tokio::test]
    async fn send_preserves_order() {
        let (conn, mut rx) = make_connection();
        for i in 0..5u8 {
            conn.send(Bytes::from(vec![i])).unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(rx.recv().await.unwrap()[..], [i]);
        }
    }

    #[test]
    fn send_to_dropped_receiver_is_closed() {
        let (conn, rx) = make_connection();
        drop(rx);
        assert_eq!(conn.send(Bytes::from_static(b"x")), Err(SendError::Closed));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_to_full_queue() {
        let (conn, _rx) = RelayConnection::channel(ConnectionId::new(2), 1);
        conn.send(Bytes::from_static(b"one")).unwrap();
        assert_eq!(
            conn.send(Bytes::from_static(b"two")),
            Err(SendError::QueueFull)
        );
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_after_close_fails() {
        let (conn, _rx) = make_connection();
        conn.close();
        assert!(conn.is_closed());
        assert_eq!(conn.send(Bytes::from_static(b"x")), Err(SendError::Closed));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (conn, _rx) = RelayConnection::channel(ConnectionId::new(3), 0);
        conn.send(Bytes::from_static(b"x")).unwrap();
    }

    #[test]
    fn first_close_frame_wins() {
        let (conn, _rx) = make_connection();
        conn.close_with(1003, "binary only");
        conn.close_with(1000, "later");
        let frame = conn.take_close_frame().unwrap();
        assert_eq!(frame.code, 1003);
        assert_eq!(frame.reason.as_str(), "binary only");
        assert!(conn.take_close_frame().is_none());
    }

    #[test]
    fn close_with_after_close_keeps_no_frame() {
        let (conn, _rx) = make_connection();
        conn.close();
        conn.close_with(1002, "late");
        assert!(conn.take_close_frame().is_none());
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let (conn, _rx) = make_connection();
        conn.close();
        conn.closed().await;
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_idle_time() {
        let (conn, _rx) = make_connection();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(conn.idle_for() >= Duration::from_secs(30));

        conn.touch();
        assert!(conn.idle_for() < Duration::from_secs(1));
    }

    #[test]
    fn connection_age_increases() {
        let (conn, _rx) = make_connection();
        let age1 = conn.age();
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.age() > age1);
        assert!(conn.idle_for() >= Duration::from_millis(10));
    }

    #[test]
    fn debug_shows_id() {
        let (conn, _rx) = make_connection();
        let debug = format!("{conn:?}");
        assert!(debug.contains("RelayConnection"));
        assert!(debug.contains("closed: false"));
    }
}
