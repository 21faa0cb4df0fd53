//! Relay dispatch: decoded frames and HTTP posts to live connections.

use bytes::Bytes;
use ilam_core::frame;
use ilam_core::{ConnectionId, ProtocolError, RelayError};
use metrics::counter;
use tracing::{debug, warn};

use super::connection::SendError;
use super::registry::ConnectionRegistry;
use crate::metrics::{RELAY_FRAMES_DROPPED_TOTAL, RELAY_FRAMES_FORWARDED_TOTAL};

/// What happened to a well-formed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Payload queued on the destination's connection.
    Forwarded {
        /// Destination id.
        destination: ConnectionId,
        /// Payload length in bytes.
        len: usize,
    },
    /// No live connection under the destination id. The frame was dropped.
    TargetUnavailable(ConnectionId),
    /// The destination exists but could not take the payload.
    SendFailed {
        /// Destination id.
        destination: ConnectionId,
        /// Queue failure.
        error: SendError,
    },
}

/// Handle one binary message received from `source`.
///
/// Malformed or unroutable frames are protocol errors and end the sender's
/// session. Everything past decoding is best effort and never fails the
/// sender.
pub fn handle_binary(
    data: Bytes,
    source: ConnectionId,
    registry: &ConnectionRegistry,
) -> Result<RelayOutcome, ProtocolError> {
    let frame = frame::decode(data)?;
    let destination = frame.connection_target()?;
    let len = frame.payload.len();

    let target = match registry.lookup(destination) {
        Ok(target) => target,
        Err(_) => {
            debug!(connection_id = %source, %destination, len, "relay target not live, dropping frame");
            counter!(RELAY_FRAMES_DROPPED_TOTAL, "reason" => "target_unavailable").increment(1);
            return Ok(RelayOutcome::TargetUnavailable(destination));
        }
    };

    match target.send(frame.payload) {
        Ok(()) => {
            counter!(RELAY_FRAMES_FORWARDED_TOTAL).increment(1);
            Ok(RelayOutcome::Forwarded { destination, len })
        }
        Err(error) => {
            warn!(connection_id = %source, %destination, len, %error, "failed to enqueue relay frame");
            counter!(RELAY_FRAMES_DROPPED_TOTAL, "reason" => "send_failed").increment(1);
            Ok(RelayOutcome::SendFailed { destination, error })
        }
    }
}

/// Write `payload` verbatim to the live connection `destination`.
///
/// Used by the out-of-band HTTP path, which bypasses the frame codec.
pub fn deliver(
    registry: &ConnectionRegistry,
    destination: ConnectionId,
    payload: Bytes,
) -> Result<(), RelayError> {
    let target = registry.lookup(destination)?;
    target.send(payload).map_err(RelayError::transport)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use ilam_core::frame::{DecodeError, RelayFrame};
    use tokio::sync::mpsc;

    use super::*;
    use crate::websocket::connection::RelayConnection;

    fn register(registry: &ConnectionRegistry, id: u64) -> mpsc::Receiver<Bytes> {
        let (conn, rx) = RelayConnection::channel(ConnectionId::new(id), 4);
        registry.claim(ConnectionId::new(id), Arc::new(conn)).unwrap();
        rx
    }

    #[tokio::test]
    async fn forwards_payload_verbatim() {
        let registry = ConnectionRegistry::new();
        let mut rx = register(&registry, 200);

        let frame = RelayFrame::to_connection(ConnectionId::new(200), "hi");
        let outcome = handle_binary(frame.encode(), ConnectionId::new(100), &registry).unwrap();

        assert_eq!(
            outcome,
            RelayOutcome::Forwarded {
                destination: ConnectionId::new(200),
                len: 2
            }
        );
        assert_eq!(&rx.recv().await.unwrap()[..], b"hi");
    }

    #[test]
    fn missing_target_is_not_an_error() {
        let registry = ConnectionRegistry::new();
        let frame = RelayFrame::to_connection(ConnectionId::new(999), "x");
        let outcome = handle_binary(frame.encode(), ConnectionId::new(1), &registry).unwrap();
        assert_eq!(outcome, RelayOutcome::TargetUnavailable(ConnectionId::new(999)));
    }

    #[test]
    fn full_target_reports_send_failure() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = RelayConnection::channel(ConnectionId::new(2), 1);
        registry.claim(ConnectionId::new(2), Arc::new(conn)).unwrap();

        let frame = RelayFrame::to_connection(ConnectionId::new(2), "a").encode();
        let _ = handle_binary(frame.clone(), ConnectionId::new(1), &registry).unwrap();
        let outcome = handle_binary(frame, ConnectionId::new(1), &registry).unwrap();
        assert_matches!(
            outcome,
            RelayOutcome::SendFailed {
                error: SendError::QueueFull,
                ..
            }
        );
    }

    #[test]
    fn bad_magic_is_protocol_error() {
        let registry = ConnectionRegistry::new();
        let err = handle_binary(Bytes::from_static(&[9, 1, 0]), ConnectionId::new(1), &registry)
            .unwrap_err();
        assert_eq!(err, ProtocolError::Frame(DecodeError::InvalidMagic(9)));
    }

    #[test]
    fn nonzero_reserved_fields_are_protocol_error() {
        let registry = ConnectionRegistry::new();
        let _rx = register(&registry, 5);
        let mut frame = RelayFrame::to_connection(ConnectionId::new(5), "x");
        frame.address = Ipv4Addr::new(10, 0, 0, 1);
        frame.port = 80;
        let err = handle_binary(frame.encode(), ConnectionId::new(1), &registry).unwrap_err();
        assert_matches!(
            err,
            ProtocolError::Frame(DecodeError::UnsupportedDestination { port: 80, .. })
        );
    }

    #[tokio::test]
    async fn deliver_writes_raw_body() {
        let registry = ConnectionRegistry::new();
        let mut rx = register(&registry, 200);
        deliver(&registry, ConnectionId::new(200), Bytes::from_static(b"ping")).unwrap();
        assert_eq!(&rx.recv().await.unwrap()[..], b"ping");
    }

    #[test]
    fn deliver_to_missing_is_not_found() {
        let registry = ConnectionRegistry::new();
        let err = deliver(&registry, ConnectionId::new(999), Bytes::new()).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn deliver_to_closed_is_transport_error() {
        let registry = ConnectionRegistry::new();
        let rx = register(&registry, 3);
        drop(rx);
        let err = deliver(&registry, ConnectionId::new(3), Bytes::new()).unwrap_err();
        assert_eq!(err.status_code(), 500);
    }
}
