//! Engine configuration
//!
//! Explicit configuration structs handed to each component at
//! construction. The engine keeps no global settings state; hosts that
//! persist these structs do so in a format of their own choosing (all
//! types are serde-derived for that purpose).

use crate::core::link::ReconnectPolicy;
use crate::core::transport::Endpoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Character encoding applied to literal command text and to the text
/// terminal's printable runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Charset {
    /// UTF-8
    #[default]
    Utf8,
    /// 7-bit ASCII
    Ascii,
    /// ISO-8859-1
    Latin1,
}

/// Which processing grammar the terminal applies to the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TerminalMode {
    /// Line-oriented text with a configurable EOL sequence
    #[default]
    Text,
    /// Hex rendering with fixed-width line breaks
    Binary,
}

/// How non-EOL control characters are rendered in text mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlRadix {
    /// ASCII mnemonic, e.g. `<CR>`
    #[default]
    Mnemonic,
    /// Decimal, e.g. `<13>`
    Decimal,
    /// Hexadecimal, e.g. `<0D>`
    Hex,
}

/// Text-mode terminal settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSettings {
    /// End-of-line byte sequence delimiting display lines
    pub eol: Vec<u8>,
    /// Charset for decoding printable bytes
    pub charset: Charset,
    /// Rendering of non-EOL control characters
    pub control_radix: ControlRadix,
    /// Force a line break after this many payload bytes
    pub max_line_length: usize,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            eol: b"\r\n".to_vec(),
            charset: Charset::Utf8,
            control_radix: ControlRadix::Mnemonic,
            max_line_length: 256,
        }
    }
}

impl TextSettings {
    /// Set the EOL sequence.
    #[must_use]
    pub fn eol(mut self, eol: &[u8]) -> Self {
        self.eol = eol.to_vec();
        self
    }

    /// Set the charset.
    #[must_use]
    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Set the control-character radix.
    #[must_use]
    pub fn control_radix(mut self, radix: ControlRadix) -> Self {
        self.control_radix = radix;
        self
    }

    /// Set the forced line-break length.
    #[must_use]
    pub fn max_line_length(mut self, len: usize) -> Self {
        self.max_line_length = len;
        self
    }
}

/// Binary-mode terminal settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySettings {
    /// Bytes per display line
    pub line_width: usize,
    /// Break the open line after this much receive silence
    pub idle_flush: Option<Duration>,
}

impl Default for BinarySettings {
    fn default() -> Self {
        Self {
            line_width: 16,
            idle_flush: Some(Duration::from_millis(500)),
        }
    }
}

impl BinarySettings {
    /// Set the line width in bytes.
    #[must_use]
    pub fn line_width(mut self, width: usize) -> Self {
        self.line_width = width;
        self
    }

    /// Set or disable the idle flush.
    #[must_use]
    pub fn idle_flush(mut self, idle: Option<Duration>) -> Self {
        self.idle_flush = idle;
        self
    }
}

/// Display settings shared by the three repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Line capacity per repository; the oldest line is evicted beyond it
    pub capacity: usize,
    /// Active processing grammar
    pub mode: TerminalMode,
    /// Text-mode settings
    pub text: TextSettings,
    /// Binary-mode settings
    pub binary: BinarySettings,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            capacity: 1000,
            mode: TerminalMode::Text,
            text: TextSettings::default(),
            binary: BinarySettings::default(),
        }
    }
}

impl DisplaySettings {
    /// Set the per-repository line capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the terminal mode.
    #[must_use]
    pub fn mode(mut self, mode: TerminalMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Complete configuration for one terminal session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Session name (for display and logging)
    pub name: String,
    /// Transport descriptor
    pub endpoint: Endpoint,
    /// Display settings
    pub display: DisplaySettings,
    /// Reconnect policy applied on transient loss
    pub reconnect: ReconnectPolicy,
    /// Gate outbound data on in-band XON/XOFF
    pub software_flow_control: bool,
}

impl SessionSettings {
    /// Create settings with defaults for everything but the endpoint.
    pub fn new(name: &str, endpoint: Endpoint) -> Self {
        Self {
            name: name.to_string(),
            endpoint,
            display: DisplaySettings::default(),
            reconnect: ReconnectPolicy::default(),
            software_flow_control: false,
        }
    }

    /// Set the display settings.
    #[must_use]
    pub fn display(mut self, display: DisplaySettings) -> Self {
        self.display = display;
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Enable or disable the XON/XOFF gate.
    #[must_use]
    pub fn software_flow_control(mut self, enabled: bool) -> Self {
        self.software_flow_control = enabled;
        self
    }
}
