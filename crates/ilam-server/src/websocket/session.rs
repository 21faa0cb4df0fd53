//! Relay session lifecycle: one connected client from claim through
//! teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use ilam_core::{ConnectionId, ProtocolError, RelayError};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::time::{self, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::RelayConnection;
use super::handler::handle_binary;
use super::idle::{self, IdleOutcome};
use super::registry::{ConnectionRegistry, Registration};
use crate::metrics::{
    WS_CLAIM_CONFLICTS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// How long teardown waits for the writer to flush its close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared inputs for every session.
pub struct SessionContext {
    /// Live connection map.
    pub registry: Arc<ConnectionRegistry>,
    /// Server ping cadence. `None` disables pings.
    pub heartbeat_interval: Option<Duration>,
    /// Close sessions silent for this long. `None` disables.
    pub idle_timeout: Option<Duration>,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The id was already owned; the new socket was turned away.
    IdConflict,
    /// The client sent a Close frame.
    ClientClosed,
    /// The socket stream ended without a Close frame.
    StreamEnded,
    /// Reading from the socket failed.
    ReadError(String),
    /// The client broke the relay protocol.
    Protocol(ProtocolError),
    /// No inbound activity within the idle timeout.
    IdleTimeout,
    /// The writer stopped (socket write failed).
    WriterClosed,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Short label, used as a log field and metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdConflict => "id_conflict",
            Self::ClientClosed => "client_closed",
            Self::StreamEnded => "stream_ended",
            Self::ReadError(_) => "read_error",
            Self::Protocol(_) => "protocol",
            Self::IdleTimeout => "idle_timeout",
            Self::WriterClosed => "writer_closed",
            Self::Shutdown => "shutdown",
        }
    }

    /// Close code and reason sent to the client.
    pub fn close_frame(&self) -> (u16, &'static str) {
        match self {
            Self::IdConflict => (close_code::POLICY, "connection id in use"),
            Self::Protocol(ProtocolError::TextMessage) => {
                (close_code::UNSUPPORTED, "binary messages only")
            }
            Self::Protocol(_) => (close_code::PROTOCOL, "invalid relay frame"),
            Self::IdleTimeout => (close_code::POLICY, "idle timeout"),
            Self::Shutdown => (close_code::AWAY, "server shutting down"),
            Self::ReadError(_) | Self::WriterClosed => (close_code::ERROR, ""),
            Self::ClientClosed | Self::StreamEnded => (close_code::NORMAL, ""),
        }
    }
}

/// Claim the connection's id, reporting a conflict as a relay error.
fn claim(
    registry: &Arc<ConnectionRegistry>,
    connection: &Arc<RelayConnection>,
) -> Result<Registration, RelayError> {
    Ok(Registration::claim(registry, Arc::clone(connection))?)
}

/// Run a relay session for an upgraded socket.
///
/// 1. Claims `id`; on conflict closes the new socket and returns
/// 2. Spawns the writer task (outbound payloads and pings)
/// 3. Reads until close, error, protocol violation, idle timeout or shutdown
/// 4. Releases `id` and closes the socket
#[instrument(skip_all, fields(connection_id = %id))]
pub async fn run_relay_session(
    socket: WebSocket,
    id: ConnectionId,
    ctx: Arc<SessionContext>,
) -> CloseReason {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (connection, send_rx) = RelayConnection::channel(id, ctx.send_queue_capacity);
    let connection = Arc::new(connection);

    let registration = match claim(&ctx.registry, &connection) {
        Ok(registration) => registration,
        Err(error) => {
            warn!(%error, kind = error.kind(), "rejecting connection");
            counter!(WS_CLAIM_CONFLICTS_TOTAL).increment(1);
            let reason = CloseReason::IdConflict;
            let (code, text) = reason.close_frame();
            let frame = CloseFrame {
                code,
                reason: text.into(),
            };
            let _ = ws_tx.send(Message::Close(Some(frame))).await;
            return reason;
        }
    };

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    let teardown = Teardown::new(registration, Arc::clone(&connection));

    let mut writer = tokio::spawn(run_writer(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        ctx.heartbeat_interval,
    ));

    let idle = watch_idle(&connection, ctx.idle_timeout);
    let reason = tokio::select! {
        reason = read_loop(&mut ws_rx, &connection, &ctx.registry) => reason,
        IdleOutcome::TimedOut = idle => CloseReason::IdleTimeout,
        () = connection.closed() => CloseReason::WriterClosed,
        () = ctx.shutdown.cancelled() => CloseReason::Shutdown,
    };

    let (code, text) = reason.close_frame();
    connection.close_with(code, text);
    drop(teardown);

    if time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        debug!("writer did not finish in time, aborting");
        writer.abort();
    }

    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    info!(
        reason = reason.as_str(),
        duration_secs = connection.age().as_secs(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    reason
}

/// Releases the id and closes the connection when the session ends,
/// whether it returns or unwinds.
struct Teardown {
    connection: Arc<RelayConnection>,
    _registration: Registration,
}

impl Teardown {
    fn new(registration: Registration, connection: Arc<RelayConnection>) -> Self {
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        Self {
            connection,
            _registration: registration,
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.connection.close();
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(self.connection.age().as_secs_f64());
    }
}

async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    connection: &Arc<RelayConnection>,
    registry: &ConnectionRegistry,
) -> CloseReason {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                debug!(%error, "socket read failed");
                return CloseReason::ReadError(error.to_string());
            }
        };
        connection.touch();

        match message {
            Message::Binary(data) => {
                if let Err(error) = handle_binary(data, connection.id(), registry) {
                    warn!(%error, "invalid relay frame");
                    return CloseReason::Protocol(error);
                }
            }
            Message::Pong(_) => registry.refresh(connection.id(), Arc::clone(connection)),
            // axum answers pings itself
            Message::Ping(_) => {}
            Message::Text(_) => {
                warn!("text message on binary relay channel");
                return CloseReason::Protocol(ProtocolError::TextMessage);
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                return CloseReason::ClientClosed;
            }
        }
    }
    CloseReason::StreamEnded
}

/// Owns the socket sink: drains queued payloads, sends pings, and sends the
/// close frame once the connection is closed.
async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Bytes>,
    connection: Arc<RelayConnection>,
    ping_every: Option<Duration>,
) {
    let mut ping = ping_every
        .filter(|every| !every.is_zero())
        .map(|every| time::interval_at(time::Instant::now() + every, every));

    loop {
        tokio::select! {
            biased;
            () = connection.closed() => break,
            payload = outbound.recv() => {
                let Some(payload) = payload else { break };
                if let Err(error) = sink.send(Message::Binary(payload)).await {
                    debug!(%error, "socket write failed");
                    break;
                }
            }
            () = next_tick(ping.as_mut()) => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let frame = connection.take_close_frame();
    connection.close();
    let _ = sink.send(Message::Close(frame)).await;
    let _ = sink.close().await;
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn watch_idle(connection: &RelayConnection, timeout: Option<Duration>) -> IdleOutcome {
    match timeout {
        Some(timeout) => idle::watch_idle(connection, timeout).await,
        None => std::future::pending().await,
    }
}
