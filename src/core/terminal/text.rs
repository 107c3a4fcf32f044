//! Text-mode byte scanner
//!
//! Scans incoming bytes against the configured EOL sequence, rendering
//! printable runs per the session charset and control characters per the
//! configured radix. EOL matching tolerates the sequence being split
//! across chunks: the partial-match count is carried between scans.
//! Malformed character data becomes an inline error element; a corrupt
//! byte never stops subsequent bytes from being displayed.

use super::{DisplayElement, Token};
use crate::config::{Charset, ControlRadix, TextSettings};
use crate::core::ascii;

pub(crate) struct TextScanner {
    settings: TextSettings,
    /// Bytes of the EOL sequence matched so far
    matched: usize,
    /// Incomplete UTF-8 sequence awaiting continuation bytes
    pending: Vec<u8>,
    /// Printable run not yet emitted
    run: String,
    /// Payload bytes on the current line
    line_len: usize,
}

impl TextScanner {
    pub(crate) fn new(settings: TextSettings) -> Self {
        Self {
            settings,
            matched: 0,
            pending: Vec::new(),
            run: String::new(),
            line_len: 0,
        }
    }

    /// Scan one chunk. The trailing printable run is flushed so the open
    /// line always reflects everything displayable; an incomplete UTF-8
    /// sequence or partial EOL match stays pending for the next chunk.
    pub(crate) fn scan(&mut self, data: &[u8]) -> Vec<Token> {
        let mut out = Vec::new();
        for &byte in data {
            self.step(byte, &mut out);
        }
        self.flush_run(&mut out);
        out
    }

    /// Flush the printable run without disturbing carried match state.
    pub(crate) fn flush(&mut self) -> Vec<Token> {
        let mut out = Vec::new();
        self.flush_run(&mut out);
        out
    }

    /// Reset per-line counters after a forced break.
    pub(crate) fn reset_line(&mut self) {
        self.line_len = 0;
    }

    /// Drop all carried state.
    pub(crate) fn reset(&mut self) {
        self.matched = 0;
        self.pending.clear();
        self.run.clear();
        self.line_len = 0;
    }

    fn step(&mut self, byte: u8, out: &mut Vec<Token>) {
        let eol = self.settings.eol.clone();
        loop {
            if !eol.is_empty() && byte == eol[self.matched] {
                self.matched += 1;
                if self.matched == eol.len() {
                    self.flush_run(out);
                    self.flush_pending(out);
                    out.push(Token::Close(DisplayElement::LineBreak));
                    self.matched = 0;
                    self.line_len = 0;
                }
                return;
            }
            if self.matched == 0 {
                break;
            }
            // Partial EOL turned out to be ordinary data; replay the
            // matched prefix, then retry the current byte from scratch.
            let prefix: Vec<u8> = eol[..self.matched].to_vec();
            self.matched = 0;
            for pb in prefix {
                self.data_byte(pb, out);
            }
        }
        self.data_byte(byte, out);
    }

    fn data_byte(&mut self, byte: u8, out: &mut Vec<Token>) {
        let max = self.settings.max_line_length;
        if max > 0 && self.line_len >= max {
            self.flush_run(out);
            self.flush_pending(out);
            out.push(Token::Close(DisplayElement::LineBreakImplicit));
            self.line_len = 0;
        }
        self.line_len += 1;

        if ascii::is_control(byte) {
            self.flush_run(out);
            self.flush_pending(out);
            out.push(Token::El(DisplayElement::ControlGlyph(self.glyph(byte))));
            return;
        }

        match self.settings.charset {
            Charset::Ascii => {
                if byte < 0x80 {
                    self.run.push(byte as char);
                } else {
                    self.flush_run(out);
                    out.push(Token::El(DisplayElement::Error(format!(
                        "non-ASCII byte 0x{byte:02X}"
                    ))));
                }
            }
            Charset::Latin1 => self.run.push(byte as char),
            Charset::Utf8 => self.utf8_byte(byte, out),
        }
    }

    fn utf8_byte(&mut self, byte: u8, out: &mut Vec<Token>) {
        self.pending.push(byte);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    self.run.push_str(s);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if valid > 0 {
                        // Safe: validated prefix
                        self.run.push_str(std::str::from_utf8(&self.pending[..valid]).expect("validated"));
                        self.pending.drain(..valid);
                        continue;
                    }
                    match e.error_len() {
                        // Sequence may still complete in a later chunk
                        None => return,
                        Some(bad) => {
                            self.flush_run(out);
                            let rejected: Vec<u8> = self.pending.drain(..bad).collect();
                            out.push(Token::El(DisplayElement::Error(format!(
                                "malformed UTF-8 sequence {rejected:02X?}"
                            ))));
                        }
                    }
                }
            }
        }
    }

    /// Emit a pending-but-incomplete UTF-8 sequence as an error. Called
    /// when a control character or line end interrupts the sequence.
    fn flush_pending(&mut self, out: &mut Vec<Token>) {
        if self.pending.is_empty() {
            return;
        }
        let rejected: Vec<u8> = std::mem::take(&mut self.pending);
        out.push(Token::El(DisplayElement::Error(format!(
            "truncated UTF-8 sequence {rejected:02X?}"
        ))));
    }

    fn flush_run(&mut self, out: &mut Vec<Token>) {
        if self.run.is_empty() {
            return;
        }
        out.push(Token::El(DisplayElement::Data {
            text: std::mem::take(&mut self.run),
            control: false,
        }));
    }

    fn glyph(&self, byte: u8) -> String {
        match self.settings.control_radix {
            ControlRadix::Mnemonic => match ascii::mnemonic(byte) {
                Some(name) => format!("<{name}>"),
                None => format!("<{byte:02X}>"),
            },
            ControlRadix::Decimal => format!("<{byte}>"),
            ControlRadix::Hex => format!("<{byte:02X}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TextSettings;

    fn collect(scanner: &mut TextScanner, data: &[u8]) -> (Vec<String>, usize) {
        let mut texts = Vec::new();
        let mut closes = 0;
        for token in scanner.scan(data) {
            match token {
                Token::El(DisplayElement::Data { text, .. }) => texts.push(text),
                Token::El(DisplayElement::ControlGlyph(g)) => texts.push(g),
                Token::El(DisplayElement::Error(e)) => texts.push(format!("!{e}")),
                Token::Close(_) => closes += 1,
                _ => {}
            }
        }
        (texts, closes)
    }

    #[test]
    fn test_plain_line() {
        let mut scanner = TextScanner::new(TextSettings::default());
        let (texts, closes) = collect(&mut scanner, b"hello\r\n");
        assert_eq!(texts, vec!["hello"]);
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_eol_prefix_replayed_as_data() {
        let mut scanner = TextScanner::new(TextSettings::default());
        // Lone CR is not the CRLF EOL; it must come back as a glyph
        let (texts, closes) = collect(&mut scanner, b"a\rb");
        assert_eq!(texts, vec!["a".to_string(), "<CR>".to_string(), "b".to_string()]);
        assert_eq!(closes, 0);
    }

    #[test]
    fn test_partial_eol_carried_between_scans() {
        let mut scanner = TextScanner::new(TextSettings::default());
        let (_, closes) = collect(&mut scanner, b"x\r");
        assert_eq!(closes, 0);
        let (texts, closes) = collect(&mut scanner, b"\ny");
        assert_eq!(closes, 1);
        assert_eq!(texts, vec!["y"]);
    }

    #[test]
    fn test_control_radix_variants() {
        let settings = TextSettings::default().eol(b"\n").control_radix(ControlRadix::Decimal);
        let mut scanner = TextScanner::new(settings);
        let (texts, _) = collect(&mut scanner, &[0x1B]);
        assert_eq!(texts, vec!["<27>"]);

        let settings = TextSettings::default().eol(b"\n").control_radix(ControlRadix::Hex);
        let mut scanner = TextScanner::new(settings);
        let (texts, _) = collect(&mut scanner, &[0x1B]);
        assert_eq!(texts, vec!["<1B>"]);
    }

    #[test]
    fn test_utf8_split_across_scans() {
        let mut scanner = TextScanner::new(TextSettings::default());
        // U+00E9 is C3 A9
        let (texts, _) = collect(&mut scanner, &[0xC3]);
        assert!(texts.is_empty());
        let (texts, _) = collect(&mut scanner, &[0xA9, b'!']);
        assert_eq!(texts, vec!["\u{e9}!"]);
    }

    #[test]
    fn test_malformed_utf8_becomes_error_and_stream_continues() {
        let mut scanner = TextScanner::new(TextSettings::default());
        let (texts, _) = collect(&mut scanner, &[b'a', 0xFF, b'b']);
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[0], "a");
        assert!(texts[1].starts_with('!'));
        assert_eq!(texts[2], "b");
    }

    #[test]
    fn test_max_line_length_forces_break() {
        let settings = TextSettings::default().max_line_length(4);
        let mut scanner = TextScanner::new(settings);
        let (texts, closes) = collect(&mut scanner, b"abcdef");
        assert_eq!(closes, 1);
        assert_eq!(texts, vec!["abcd", "ef"]);
    }

    #[test]
    fn test_ascii_charset_marks_high_bytes() {
        let settings = TextSettings::default().charset(Charset::Ascii);
        let mut scanner = TextScanner::new(settings);
        let (texts, _) = collect(&mut scanner, &[b'a', 0xE9]);
        assert_eq!(texts[0], "a");
        assert!(texts[1].contains("0xE9"));
    }
}
