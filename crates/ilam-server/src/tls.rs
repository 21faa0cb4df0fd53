//! TLS (`wss://`) support.
//!
//! Certificates are loaded from PEM files; accepted connections go through a
//! [`TlsAcceptor`] wrapped as an [`axum::serve::Listener`], so the router is
//! served the same way over TLS and plain TCP.

use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls_pemfile::{certs, private_key};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;
use tracing::{debug, warn};

/// Handshakes still pending after this long are dropped.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Completed handshakes buffered ahead of `accept`.
const ACCEPT_BACKLOG: usize = 64;

/// TLS setup failures.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A PEM file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The certificate file holds no certificates.
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),
    /// The key file holds no private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    /// rustls rejected the certificate/key pair.
    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] tokio_rustls::rustls::Error),
}

/// Load a server TLS configuration from PEM certificate and key files.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, TlsError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| TlsError::Io { path, source }
    };

    let cert_file = File::open(cert_path).map_err(io_err(cert_path))?;
    let cert_chain = certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err(cert_path))?;
    if cert_chain.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let key_file = File::open(key_path).map_err(io_err(key_path))?;
    let key = private_key(&mut BufReader::new(key_file))
        .map_err(io_err(key_path))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;

    Ok(Arc::new(config))
}

/// A TCP listener that yields connections after a completed TLS handshake.
///
/// Handshakes run on their own tasks, so a slow client never blocks
/// `accept` for everyone else.
pub struct TlsListener {
    incoming: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    /// Start accepting on `listener`, handshaking with `acceptor`.
    pub fn new(listener: TcpListener, acceptor: TlsAcceptor, handshake_timeout: Duration) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (tx, incoming) = mpsc::channel(ACCEPT_BACKLOG);
        let accept_task = tokio::spawn(accept_loop(listener, acceptor, handshake_timeout, tx));
        Ok(Self {
            incoming,
            local_addr,
            accept_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.incoming.recv().await {
            Some(conn) => conn,
            // The accept loop only exits once this listener is gone
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    tx: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    while !tx.is_closed() {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(error) => {
                warn!(%error, "tcp accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let tx = tx.clone();
        let _handshake = tokio::spawn(async move {
            match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    let _ = tx.send((tls, peer)).await;
                }
                Ok(Err(error)) => debug!(%peer, %error, "tls handshake failed"),
                Err(_) => debug!(%peer, "tls handshake timed out"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;

    use super::*;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn missing_cert_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_file(&dir, "key.pem", "");
        let err = load_tls_config(&dir.path().join("nope.pem"), &key).unwrap_err();
        assert_matches!(err, TlsError::Io { ref path, .. } if path.ends_with("nope.pem"));
    }

    #[test]
    fn empty_cert_file() {
        let dir = tempfile::tempdir().unwrap();
        let cert = write_file(&dir, "cert.pem", "not a pem\n");
        let key = write_file(&dir, "key.pem", "");
        let err = load_tls_config(&cert, &key).unwrap_err();
        assert_matches!(err, TlsError::NoCertificates(_));
        assert!(err.to_string().contains("cert.pem"));
    }

    #[test]
    fn missing_private_key() {
        let dir = tempfile::tempdir().unwrap();
        // Syntactically valid PEM block; content is not checked before the key
        let cert = write_file(
            &dir,
            "cert.pem",
            "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n",
        );
        let key = write_file(&dir, "key.pem", "no key here\n");
        let err = load_tls_config(&cert, &key).unwrap_err();
        assert_matches!(err, TlsError::NoPrivateKey(_));
    }

    #[tokio::test]
    async fn listener_reports_local_addr() {
        use axum::serve::Listener;

        let config = tokio_rustls::rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(
                tokio_rustls::rustls::server::ResolvesServerCertUsingSni::new(),
            ));
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let expected = tcp.local_addr().unwrap();

        let listener = TlsListener::new(tcp, acceptor, HANDSHAKE_TIMEOUT).unwrap();
        assert_eq!(listener.local_addr().unwrap(), expected);
    }
}
