//! TCP auto-socket transport implementation
//!
//! An endpoint that does not require the user to know which side listens.
//! Each `open` runs one negotiation cycle: try to connect as a client
//! within a bounded timeout, and on refusal or timeout fall back to
//! listening as a server for one bounded accept window. Whichever role
//! succeeds first is the active role for the session; the other is torn
//! down on success, so only one role exists at any instant. Connection
//! latency is nondeterministic as a result.
//!
//! Cycle repetition, backoff and the attempt bound are the link's
//! reconnect policy; the listener is kept bound across cycles so a peer
//! can reach us between client attempts.

use super::{Channel, OpeningPhase, TransportError, TransportKind, TransportStats};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Negotiated role of an auto-socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocketRole {
    /// Connected out as a client
    Client,
    /// Accepted the peer as a server
    Server,
}

/// TCP auto-socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSocketConfig {
    /// Remote host to try first
    pub host: String,
    /// Remote port to try first
    pub port: u16,
    /// Local port to listen on in the fallback role; defaults to `port`
    pub local_port: Option<u16>,
    /// Client connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Server accept window in milliseconds
    pub accept_timeout_ms: u64,
}

impl AutoSocketConfig {
    /// Create a new auto-socket configuration.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            local_port: None,
            connect_timeout_ms: 2_000,
            accept_timeout_ms: 2_000,
        }
    }

    /// Set the fallback listening port.
    #[must_use]
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Set the client connect timeout.
    #[must_use]
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the server accept window.
    #[must_use]
    pub fn accept_timeout_ms(mut self, ms: u64) -> Self {
        self.accept_timeout_ms = ms;
        self
    }
}

/// TCP auto-socket channel.
pub struct AutoSocketTransport {
    config: AutoSocketConfig,
    role: Option<SocketRole>,
    stream: Option<TcpStream>,
    listener: Option<TcpListener>,
    peer: Option<SocketAddr>,
    stats: Arc<RwLock<TransportStats>>,
}

impl AutoSocketTransport {
    /// Create an auto-socket channel, validating the configuration.
    pub fn new(config: AutoSocketConfig) -> Result<Self, TransportError> {
        if config.host.is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "empty host address".to_string(),
            ));
        }
        Ok(Self {
            config,
            role: None,
            stream: None,
            listener: None,
            peer: None,
            stats: Arc::new(RwLock::new(TransportStats::default())),
        })
    }

    /// Whether the fallback listener is currently bound.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Address of the fallback listener, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    async fn try_client(&mut self) -> Result<(), TransportError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let stream = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.connect_timeout_ms))?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        stream.set_nodelay(true).map_err(TransportError::Io)?;
        self.peer = stream.peer_addr().ok();
        self.stream = Some(stream);
        self.role = Some(SocketRole::Client);
        // The client role won; tear the other role down.
        self.listener = None;
        Ok(())
    }

    async fn try_server(&mut self) -> Result<(), TransportError> {
        if self.listener.is_none() {
            let port = self.config.local_port.unwrap_or(self.config.port);
            let addr = format!("0.0.0.0:{port}");
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            self.listener = Some(listener);
        }
        let listener = self.listener.as_ref().ok_or(TransportError::NotConnected)?;

        let (stream, peer) = tokio::time::timeout(
            Duration::from_millis(self.config.accept_timeout_ms),
            listener.accept(),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.accept_timeout_ms))?
        .map_err(TransportError::Io)?;

        stream.set_nodelay(true).map_err(TransportError::Io)?;
        self.peer = Some(peer);
        self.stream = Some(stream);
        self.role = Some(SocketRole::Server);
        Ok(())
    }
}

#[async_trait]
impl Channel for AutoSocketTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.role = None;

        match self.try_client().await {
            Ok(()) => {
                debug!(peer = %self.peer_info(), "auto-socket connected as client");
                *self.stats.write() = TransportStats::default();
                return Ok(());
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!(error = %e, "auto-socket client attempt failed, falling back to server"),
        }

        self.try_server().await?;
        debug!(peer = %self.peer_info(), "auto-socket accepted as server");
        *self.stats.write() = TransportStats::default();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
        self.listener = None;
        self.peer = None;
        self.role = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        stream.write_all(data).await.map_err(TransportError::Io)?;
        stream.flush().await.map_err(TransportError::Io)?;

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.chunks_sent += 1;

        Ok(data.len())
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        match tokio::time::timeout(Duration::from_millis(100), stream.readable()).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(TransportError::Io(e)),
            Ok(Ok(())) => {}
        }

        let mut buffer = vec![0u8; 4096];
        match stream.try_read(&mut buffer) {
            Ok(0) => {
                self.stream = None;
                self.peer = None;
                self.role = None;
                Err(TransportError::Disconnected)
            }
            Ok(n) => {
                buffer.truncate(n);

                let mut stats = self.stats.write();
                stats.bytes_received += n as u64;
                stats.chunks_received += 1;

                Ok(Some(Bytes::from(buffer)))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::TcpAutoSocket
    }

    fn peer_info(&self) -> String {
        let role = match self.role {
            Some(SocketRole::Client) => " (client)",
            Some(SocketRole::Server) => " (server)",
            None => "",
        };
        match self.peer {
            Some(peer) => format!("{peer}{role}"),
            None => format!("{}:{}{role}", self.config.host, self.config.port),
        }
    }

    fn stats(&self) -> TransportStats {
        *self.stats.read()
    }

    fn opening_phase(&self) -> OpeningPhase {
        OpeningPhase::Connecting
    }

    fn role(&self) -> Option<SocketRole> {
        self.role
    }
}
