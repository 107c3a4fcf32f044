//! TCP server transport implementation
//!
//! Serves exactly one peer at a time. The listener is bound on the first
//! `open` and kept across accept retries so the port is not lost between
//! reconnect attempts; an accept window elapsing without a peer is a
//! transient error for the reconnect policy.

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

/// TCP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpServerConfig {
    /// Local address to bind
    pub bind_addr: String,
    /// Port number (0 picks an ephemeral port)
    pub port: u16,
    /// Accept window in milliseconds
    pub accept_timeout_ms: u64,
}

impl TcpServerConfig {
    /// Create a new TCP server configuration.
    pub fn new(bind_addr: &str, port: u16) -> Self {
        Self {
            bind_addr: bind_addr.to_string(),
            port,
            accept_timeout_ms: 10_000,
        }
    }

    /// Set the accept window.
    #[must_use]
    pub fn accept_timeout_ms(mut self, ms: u64) -> Self {
        self.accept_timeout_ms = ms;
        self
    }
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", 23)
    }
}

/// Single-peer TCP server channel.
pub struct TcpServerTransport {
    config: TcpServerConfig,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    stats: Arc<RwLock<TransportStats>>,
}

impl TcpServerTransport {
    /// Create a TCP server channel, validating the configuration.
    pub fn new(config: TcpServerConfig) -> Result<Self, TransportError> {
        if config.bind_addr.is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "empty bind address".to_string(),
            ));
        }
        Ok(Self {
            config,
            listener: None,
            stream: None,
            peer: None,
            stats: Arc::new(RwLock::new(TransportStats::default())),
        })
    }

    /// Address the listener is bound to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    async fn bind(&mut self) -> Result<(), TransportError> {
        if self.listener.is_some() {
            return Ok(());
        }
        let addr = format!("{}:{}", self.config.bind_addr, self.config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => TransportError::AddrInUse(addr.clone()),
            std::io::ErrorKind::AddrNotAvailable | std::io::ErrorKind::InvalidInput => {
                TransportError::InvalidConfiguration(format!("cannot bind {addr}"))
            }
            _ => TransportError::ConnectionFailed(e.to_string()),
        })?;
        self.listener = Some(listener);
        Ok(())
    }
}

#[async_trait]
impl Channel for TcpServerTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.bind().await?;
        let listener = self.listener.as_ref().ok_or(TransportError::NotConnected)?;

        let (stream, peer) = tokio::time::timeout(
            Duration::from_millis(self.config.accept_timeout_ms),
            listener.accept(),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.accept_timeout_ms))?
        .map_err(TransportError::Io)?;

        stream.set_nodelay(true).map_err(TransportError::Io)?;

        self.stream = Some(stream);
        self.peer = Some(peer);
        *self.stats.write() = TransportStats::default();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
        self.peer = None;
        self.listener = None;
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
        TransportKind::TcpServer
    }

    fn peer_info(&self) -> String {
        match self.peer {
            Some(peer) => format!(
                "{}:{} <- {}",
                self.config.bind_addr, self.config.port, peer
            ),
            None => format!("{}:{}", self.config.bind_addr, self.config.port),
        }
    }

    fn stats(&self) -> TransportStats {
        *self.stats.read()
    }

    fn opening_phase(&self) -> OpeningPhase {
        OpeningPhase::Listening
    }
}
