//! # Termwire
//!
//! A multi-transport terminal communication engine:
//! - Serial ports (RS-232, RS-485, USB-Serial adapters)
//! - TCP client, TCP server, and the auto-socket that negotiates whichever
//!   role succeeds first
//! - UDP sockets
//! - USB HID devices (whole-report framing)
//!
//! ## Features
//!
//! - One capability contract across all transports, with per-kind
//!   open/close/reconnect semantics and bounded timeouts
//! - Command grammar compiling user text into transmit directives
//!   (delays, repeats, control mnemonics, literal hex bytes)
//! - Software flow control gating transmission on in-band XON/XOFF
//! - Stream reassembly of chunked bidirectional traffic into
//!   capacity-bounded display lines (text and binary grammars)
//! - A single event serializer preserving per-source ordering between
//!   concurrent transmit and receive activity
//!
//! ## Example
//!
//! ```rust,no_run
//! use termwire::{Endpoint, SerialConfig, SessionSettings, TerminalSession, View};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SessionSettings::new(
//!         "bench psu",
//!         Endpoint::Serial(SerialConfig::new("/dev/ttyUSB0", 115200)),
//!     );
//!     let session = TerminalSession::open(settings)?;
//!
//!     session.transmit("*IDN?\\<CR\\>\\<LF\\>").await?;
//!
//!     for line in session.snapshot(View::Rx) {
//!         println!("{}", line.text());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::{
    BinarySettings, Charset, ControlRadix, DisplaySettings, SessionSettings, TerminalMode,
    TextSettings,
};
pub use crate::core::command::{CommandParser, Directive, Keyword, ParseError, GRAMMAR_VERSION};
pub use crate::core::events::{Direction, IoActivity, RawChunk};
pub use crate::core::flow::{FlowGate, XOFF, XON};
pub use crate::core::link::{Link, LinkState, ReconnectPolicy};
pub use crate::core::registry::SessionRegistry;
pub use crate::core::session::{EngineError, SessionEvent, TerminalSession};
pub use crate::core::terminal::{DisplayElement, DisplayLine, LineNotice, Terminal, View};
pub use crate::core::transport::{
    AutoSocketConfig, Endpoint, HidConfig, SerialConfig, SerialFlowControl, SerialParity,
    SocketRole, TcpClientConfig, TcpServerConfig, TransportError, TransportKind, UdpConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
