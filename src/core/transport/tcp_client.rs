//! TCP client transport implementation

use super::{Channel, TransportError, TransportKind, TransportStats};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// TCP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpClientConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl TcpClientConfig {
    /// Create a new TCP client configuration.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout_ms: 10_000,
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self::new("localhost", 23)
    }
}

/// TCP client channel.
pub struct TcpClientTransport {
    config: TcpClientConfig,
    stream: Option<TcpStream>,
    stats: Arc<RwLock<TransportStats>>,
}

impl TcpClientTransport {
    /// Create a TCP client channel, validating the configuration.
    pub fn new(config: TcpClientConfig) -> Result<Self, TransportError> {
        if config.host.is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "empty host address".to_string(),
            ));
        }
        Ok(Self {
            config,
            stream: None,
            stats: Arc::new(RwLock::new(TransportStats::default())),
        })
    }
}

#[async_trait]
impl Channel for TcpClientTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let stream = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.connect_timeout_ms))?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        stream.set_nodelay(true).map_err(TransportError::Io)?;

        self.stream = Some(stream);
        *self.stats.write() = TransportStats::default();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
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
        TransportKind::TcpClient
    }

    fn peer_info(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    fn stats(&self) -> TransportStats {
        *self.stats.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(TcpClientTransport::new(TcpClientConfig::new("localhost", 4000)).is_ok());
        assert!(TcpClientTransport::new(TcpClientConfig::new("", 4000)).is_err());
    }

    #[tokio::test]
    async fn test_send_before_open_fails_fast() {
        let mut transport = TcpClientTransport::new(TcpClientConfig::new("localhost", 4000)).unwrap();
        let err = transport.send(b"data").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transient() {
        // Port 1 on loopback refuses immediately on any sane system
        let config = TcpClientConfig::new("127.0.0.1", 1).connect_timeout_ms(2000);
        let mut transport = TcpClientTransport::new(config).unwrap();
        let err = transport.open().await.unwrap_err();
        assert!(!err.is_fatal());
    }
}
