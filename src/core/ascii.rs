//! ASCII control-character mnemonics
//!
//! Shared lookup table used by the command parser (name -> byte) and the
//! text processor (byte -> display glyph).

/// Mnemonic table for the C0 control range plus DEL.
///
/// Aliases come after the canonical name so reverse lookup stays stable.
const MNEMONICS: &[(&str, u8)] = &[
    ("NUL", 0x00),
    ("SOH", 0x01),
    ("STX", 0x02),
    ("ETX", 0x03),
    ("EOT", 0x04),
    ("ENQ", 0x05),
    ("ACK", 0x06),
    ("BEL", 0x07),
    ("BS", 0x08),
    ("HT", 0x09),
    ("TAB", 0x09),
    ("LF", 0x0A),
    ("VT", 0x0B),
    ("FF", 0x0C),
    ("CR", 0x0D),
    ("SO", 0x0E),
    ("SI", 0x0F),
    ("DLE", 0x10),
    ("DC1", 0x11),
    ("XON", 0x11),
    ("DC2", 0x12),
    ("DC3", 0x13),
    ("XOFF", 0x13),
    ("DC4", 0x14),
    ("NAK", 0x15),
    ("SYN", 0x16),
    ("ETB", 0x17),
    ("CAN", 0x18),
    ("EM", 0x19),
    ("SUB", 0x1A),
    ("ESC", 0x1B),
    ("FS", 0x1C),
    ("GS", 0x1D),
    ("RS", 0x1E),
    ("US", 0x1F),
    ("DEL", 0x7F),
];

/// Look up a control byte by mnemonic name (case-insensitive).
pub fn byte_for(name: &str) -> Option<u8> {
    MNEMONICS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|&(_, b)| b)
}

/// Canonical mnemonic for a control byte, if it has one.
pub fn mnemonic(byte: u8) -> Option<&'static str> {
    MNEMONICS.iter().find(|&&(_, b)| b == byte).map(|&(n, _)| n)
}

/// Whether a byte is in the control range rendered as a glyph.
pub fn is_control(byte: u8) -> bool {
    byte < 0x20 || byte == 0x7F
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(byte_for("CR"), Some(0x0D));
        assert_eq!(byte_for("lf"), Some(0x0A));
        assert_eq!(byte_for("Xon"), Some(0x11));
        assert_eq!(byte_for("NOPE"), None);
    }

    #[test]
    fn test_canonical_reverse_lookup() {
        // Aliases never win the reverse direction
        assert_eq!(mnemonic(0x09), Some("HT"));
        assert_eq!(mnemonic(0x11), Some("DC1"));
        assert_eq!(mnemonic(0x41), None);
    }

    #[test]
    fn test_control_range() {
        assert!(is_control(0x00));
        assert!(is_control(0x1F));
        assert!(is_control(0x7F));
        assert!(!is_control(b'A'));
    }
}
