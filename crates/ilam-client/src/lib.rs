//! # ilam-client
//!
//! Async client for the relay.
//!
//! A [`RelayClient`] holds one WebSocket connection registered under its own
//! [`ConnectionId`]. It can address other connections in-band with relay
//! frames ([`RelayClient::send_frame`]) or out-of-band over HTTP
//! ([`RelayClient::post`]), and receives whatever is relayed to it with
//! [`RelayClient::recv`].

#![deny(unsafe_code)]

pub mod errors;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use ilam_core::ConnectionId;
use ilam_core::frame::RelayFrame;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

pub use errors::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connection to the relay under a fixed id.
pub struct RelayClient {
    id: ConnectionId,
    base: Url,
    http: reqwest::Client,
    socket: WsStream,
}

impl RelayClient {
    /// Connect to the relay at `base_url` (`http://` or `https://`) as `id`.
    ///
    /// The socket is opened at `ws(s)://<host>/<id>`. A base URL with a path
    /// prefix must end in `/`.
    pub async fn connect(base_url: &str, id: ConnectionId) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let ws_url = socket_url(&base, id)?;

        let (socket, _response) = connect_async(ws_url.as_str()).await?;
        debug!(connection_id = %id, url = %ws_url, "connected to relay");

        Ok(Self {
            id,
            base,
            http: reqwest::Client::new(),
            socket,
        })
    }

    /// This client's id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Relay `payload` to connection `to` over the socket.
    ///
    /// Delivery is best effort: nothing reports a missing target.
    pub async fn send_frame(&mut self, to: ConnectionId, payload: impl Into<Bytes>) -> Result<()> {
        let frame = RelayFrame::to_connection(to, payload);
        self.socket.send(Message::Binary(frame.encode())).await?;
        Ok(())
    }

    /// Deliver `payload` to connection `to` with an HTTP `POST`.
    ///
    /// Unlike [`send_frame`](Self::send_frame), a missing target is
    /// reported as [`ClientError::Status`] with status `404`.
    pub async fn post(&self, to: ConnectionId, payload: impl Into<Bytes>) -> Result<()> {
        post(&self.http, &self.base, to, payload.into()).await
    }

    /// Next payload relayed to this client. `None` once the socket closes.
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        while let Some(message) = self.socket.next().await {
            match message? {
                Message::Binary(data) => return Ok(Some(data)),
                Message::Close(frame) => {
                    debug!(connection_id = %self.id, ?frame, "relay closed the connection");
                    return Ok(None);
                }
                // Control frames are answered by tungstenite; the relay
                // never sends text.
                Message::Text(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    /// Close the socket, releasing the id on the relay.
    pub async fn close(mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("id", &self.id)
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

/// Out-of-band send without holding a connection.
pub async fn post(http: &reqwest::Client, base: &Url, to: ConnectionId, payload: Bytes) -> Result<()> {
    let url = base
        .join(&to.to_string())
        .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
    let response = http.post(url).body(payload).send().await?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

fn socket_url(base: &Url, id: ConnectionId) -> Result<Url> {
    let mut url = base
        .join(&id.to_string())
        .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ClientError::InvalidUrl(format!("unsupported scheme {other:?}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidUrl(format!("cannot use scheme {scheme}")))?;
    Ok(url)
}
