//! UDP transport implementation
//!
//! A connected datagram socket: the channel opens as soon as the local
//! bind and remote association succeed, no handshake. Each datagram is
//! delivered as one chunk.

use super::{Channel, OpeningPhase, TransportError, TransportKind, TransportStats};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Maximum datagram payload this channel receives.
const MAX_DATAGRAM: usize = 65_507;

/// UDP socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Local port to bind (0 picks an ephemeral port)
    pub local_port: u16,
}

impl UdpConfig {
    /// Create a new UDP configuration.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            local_port: 0,
        }
    }

    /// Set the local port.
    #[must_use]
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self::new("localhost", 10_000)
    }
}

/// UDP channel.
pub struct UdpTransport {
    config: UdpConfig,
    socket: Option<UdpSocket>,
    stats: Arc<RwLock<TransportStats>>,
}

impl UdpTransport {
    /// Create a UDP channel, validating the configuration.
    pub fn new(config: UdpConfig) -> Result<Self, TransportError> {
        if config.host.is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "empty host address".to_string(),
            ));
        }
        Ok(Self {
            config,
            socket: None,
            stats: Arc::new(RwLock::new(TransportStats::default())),
        })
    }

    /// Address the socket is bound to, once open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

#[async_trait]
impl Channel for UdpTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let bind_addr = format!("0.0.0.0:{}", self.config.local_port);
        let socket = UdpSocket::bind(&bind_addr).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => TransportError::AddrInUse(bind_addr.clone()),
            _ => TransportError::ConnectionFailed(e.to_string()),
        })?;

        let remote = format!("{}:{}", self.config.host, self.config.port);
        socket
            .connect(&remote)
            .await
            .map_err(|e| TransportError::InvalidConfiguration(format!("{remote}: {e}")))?;

        self.socket = Some(socket);
        *self.stats.write() = TransportStats::default();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.socket = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;

        let sent = socket
            .send(data)
            .await
            .map_err(|e| TransportError::SendError(e.to_string()))?;

        let mut stats = self.stats.write();
        stats.bytes_sent += sent as u64;
        stats.chunks_sent += 1;

        Ok(sent)
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;

        let mut buffer = vec![0u8; MAX_DATAGRAM];
        match tokio::time::timeout(Duration::from_millis(100), socket.recv(&mut buffer)).await {
            Err(_) => Ok(None),
            Ok(Ok(n)) => {
                buffer.truncate(n);

                let mut stats = self.stats.write();
                stats.bytes_received += n as u64;
                stats.chunks_received += 1;

                Ok(Some(Bytes::from(buffer)))
            }
            // A connected UDP socket surfaces ICMP unreachable here;
            // nothing is torn down, the association stays usable.
            Ok(Err(ref e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => Ok(None),
            Ok(Err(e)) => Err(TransportError::Io(e)),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn peer_info(&self) -> String {
        format!("{}:{} (udp)", self.config.host, self.config.port)
    }

    fn stats(&self) -> TransportStats {
        *self.stats.read()
    }

    fn opening_phase(&self) -> OpeningPhase {
        OpeningPhase::Starting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_fires_without_handshake() {
        let mut transport = UdpTransport::new(UdpConfig::new("127.0.0.1", 9)).unwrap();
        transport.open().await.unwrap();
        assert!(transport.is_open());
        transport.close().await.unwrap();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_datagram_roundtrip() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let mut transport =
            UdpTransport::new(UdpConfig::new("127.0.0.1", peer_addr.port())).unwrap();
        transport.open().await.unwrap();
        let local = transport.local_addr().unwrap();

        transport.send(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from.port(), local.port());

        peer.send_to(b"pong", from).await.unwrap();
        let mut got = None;
        for _ in 0..50 {
            if let Some(bytes) = transport.recv().await.unwrap() {
                got = Some(bytes);
                break;
            }
        }
        assert_eq!(got.as_deref(), Some(&b"pong"[..]));
    }
}
