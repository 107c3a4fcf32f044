//! Transport layer
//!
//! One adapter per physical channel type, all behind a single capability
//! contract:
//! - Serial ports (RS-232, RS-485, USB-Serial)
//! - TCP client
//! - TCP server (single peer)
//! - TCP auto-socket (client with server fallback)
//! - UDP socket
//! - USB HID (whole-report framing)
//!
//! Adapters move bytes and report their own failures; lifecycle retries,
//! event sequencing and flow control live above them in the link.

mod auto_socket;
mod hid;
mod serial;
mod tcp_client;
mod tcp_server;
mod udp;

pub use auto_socket::{AutoSocketConfig, AutoSocketTransport, SocketRole};
pub use hid::{HidConfig, HidTransport};
pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialParity, SerialTransport};
pub use tcp_client::{TcpClientConfig, TcpClientTransport};
pub use tcp_server::{TcpServerConfig, TcpServerTransport};
pub use udp::{UdpConfig, UdpTransport};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Transport kind identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Serial port
    Serial,
    /// TCP client
    TcpClient,
    /// TCP server
    TcpServer,
    /// TCP auto-socket
    TcpAutoSocket,
    /// UDP socket
    Udp,
    /// USB HID device
    UsbHid,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::TcpClient => write!(f, "TCP client"),
            Self::TcpServer => write!(f, "TCP server"),
            Self::TcpAutoSocket => write!(f, "TCP auto-socket"),
            Self::Udp => write!(f, "UDP"),
            Self::UsbHid => write!(f, "USB HID"),
        }
    }
}

/// Transport descriptor: one variant per channel type, carrying its
/// addressing parameters. Owned by the link that runs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Endpoint {
    /// Serial port connection
    Serial(SerialConfig),
    /// TCP client connection
    TcpClient(TcpClientConfig),
    /// TCP server (single peer)
    TcpServer(TcpServerConfig),
    /// TCP auto-socket
    TcpAutoSocket(AutoSocketConfig),
    /// UDP socket
    Udp(UdpConfig),
    /// USB HID device
    UsbHid(HidConfig),
}

impl Endpoint {
    /// Kind of the described transport.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Serial(_) => TransportKind::Serial,
            Self::TcpClient(_) => TransportKind::TcpClient,
            Self::TcpServer(_) => TransportKind::TcpServer,
            Self::TcpAutoSocket(_) => TransportKind::TcpAutoSocket,
            Self::Udp(_) => TransportKind::Udp,
            Self::UsbHid(_) => TransportKind::UsbHid,
        }
    }
}

/// What lifecycle stage an adapter goes through while opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpeningPhase {
    /// Local device/socket acquisition, no handshake
    Starting,
    /// Outbound connect in progress
    Connecting,
    /// Waiting for an inbound peer
    Listening,
}

/// Transport error types.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Attempt exceeded its timeout
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// No such port or device
    #[error("port not found: {0}")]
    PortNotFound(String),

    /// Permission denied opening the device
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Local address or port already taken
    #[error("address in use: {0}")]
    AddrInUse(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires an open link
    #[error("not connected")]
    NotConnected,

    /// The remote end went away
    #[error("disconnected")]
    Disconnected,

    /// Send failed
    #[error("send error: {0}")]
    SendError(String),
}

impl TransportError {
    /// Whether the error is a configuration problem that no retry can
    /// fix. Fatal errors are reported once; everything else feeds the
    /// reconnect policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PortNotFound(_)
                | Self::PermissionDenied(_)
                | Self::AddrInUse(_)
                | Self::InvalidConfiguration(_)
        )
    }
}

/// Byte and chunk counters per channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Send calls completed
    pub chunks_sent: u64,
    /// Non-empty receives completed
    pub chunks_received: u64,
}

/// Capability contract shared by every channel adapter.
///
/// `recv` is bounded: it returns `Ok(None)` when nothing is available
/// within its internal (sub-second) window, so a polling read loop can
/// observe stop requests. `Err(Disconnected)` reports an orderly remote
/// close.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Acquire the device / establish the connection.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Release the channel. Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the channel is currently usable for I/O.
    fn is_open(&self) -> bool;

    /// Send raw bytes; fails with `NotConnected` when not open.
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Receive available bytes, if any.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;

    /// Kind of this channel.
    fn kind(&self) -> TransportKind;

    /// Human-readable endpoint description.
    fn peer_info(&self) -> String;

    /// Counters since the last successful open.
    fn stats(&self) -> TransportStats;

    /// Lifecycle stage the adapter is in while `open` runs.
    fn opening_phase(&self) -> OpeningPhase {
        OpeningPhase::Connecting
    }

    /// Negotiated socket role, for adapters that have one.
    fn role(&self) -> Option<SocketRole> {
        None
    }
}

/// Build a channel adapter from its descriptor.
///
/// Configuration is validated here; errors are fatal and reported once,
/// without retry.
pub fn build_channel(endpoint: Endpoint) -> Result<Box<dyn Channel>, TransportError> {
    match endpoint {
        Endpoint::Serial(cfg) => Ok(Box::new(SerialTransport::new(cfg)?)),
        Endpoint::TcpClient(cfg) => Ok(Box::new(TcpClientTransport::new(cfg)?)),
        Endpoint::TcpServer(cfg) => Ok(Box::new(TcpServerTransport::new(cfg)?)),
        Endpoint::TcpAutoSocket(cfg) => Ok(Box::new(AutoSocketTransport::new(cfg)?)),
        Endpoint::Udp(cfg) => Ok(Box::new(UdpTransport::new(cfg)?)),
        Endpoint::UsbHid(cfg) => Ok(Box::new(HidTransport::new(cfg)?)),
    }
}
