//! Client against a live relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use ilam_client::{ClientError, RelayClient};
use ilam_core::ConnectionId;
use ilam_server::config::ServerConfig;
use ilam_server::server::RelayServer;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn boot() -> (String, Arc<RelayServer>) {
    let server = Arc::new(RelayServer::new(ServerConfig::default()));
    let (addr, _handle): (SocketAddr, _) = server.listen().await.unwrap();
    (format!("http://{addr}/"), server)
}

async fn connect(base: &str, server: &RelayServer, id: u64) -> RelayClient {
    let id = ConnectionId::new(id);
    let client = RelayClient::connect(base, id).await.unwrap();
    timeout(TIMEOUT, async {
        while server.registry().lookup(id).is_err() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection was not registered");
    client
}

#[tokio::test]
async fn frames_reach_the_target() {
    let (base, server) = boot().await;
    let mut a = connect(&base, &server, 100).await;
    let mut b = connect(&base, &server, 200).await;

    a.send_frame(b.id(), "hi").await.unwrap();
    let got = timeout(TIMEOUT, b.recv()).await.unwrap().unwrap();
    assert_eq!(got.as_deref(), Some(&b"hi"[..]));
}

#[tokio::test]
async fn post_reaches_the_target() {
    let (base, server) = boot().await;
    let a = connect(&base, &server, 1).await;
    let mut b = connect(&base, &server, 2).await;

    a.post(b.id(), "over http").await.unwrap();
    let got = timeout(TIMEOUT, b.recv()).await.unwrap().unwrap();
    assert_eq!(got.as_deref(), Some(&b"over http"[..]));
}

#[tokio::test]
async fn post_to_missing_target_reports_not_found() {
    let (base, server) = boot().await;
    let a = connect(&base, &server, 1).await;

    let err = a.post(ConnectionId::new(999), "x").await.unwrap_err();
    assert_matches!(err, ClientError::Status { status: 404, .. });
}

#[tokio::test]
async fn duplicate_id_ends_the_second_client() {
    let (base, server) = boot().await;
    let _owner = connect(&base, &server, 7).await;

    let mut second = RelayClient::connect(&base, ConnectionId::new(7)).await.unwrap();
    let got = timeout(TIMEOUT, second.recv()).await.unwrap().unwrap();
    assert!(got.is_none());
    assert_eq!(server.registry().count(), 1);
}

#[tokio::test]
async fn close_releases_the_id() {
    let (base, server) = boot().await;
    let a = connect(&base, &server, 5).await;
    a.close().await.unwrap();

    timeout(TIMEOUT, async {
        while !server.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let _again = connect(&base, &server, 5).await;
}

#[tokio::test]
async fn recv_ends_on_server_shutdown() {
    let (base, server) = boot().await;
    let mut a = connect(&base, &server, 1).await;

    server.shutdown().shutdown();
    let got = timeout(TIMEOUT, a.recv()).await.unwrap().unwrap();
    assert!(got.is_none());
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let result = RelayClient::connect("http://127.0.0.1:1/", ConnectionId::new(1)).await;
    assert_matches!(result, Err(ClientError::WebSocket(_)));
}
