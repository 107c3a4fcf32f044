//! Binary-mode byte scanner
//!
//! No line grammar in the stream itself: every byte renders as a
//! two-digit hex element and lines break after a fixed byte count. The
//! idle flush (an explicit break activity) closes a partial line; the
//! character-decoding path is never entered.

use super::{DisplayElement, Token};

pub(crate) struct BinaryScanner {
    line_width: usize,
    /// Bytes already on the current line
    count: usize,
}

impl BinaryScanner {
    pub(crate) fn new(line_width: usize) -> Self {
        Self {
            line_width: line_width.max(1),
            count: 0,
        }
    }

    pub(crate) fn scan(&mut self, data: &[u8]) -> Vec<Token> {
        let mut out = Vec::new();
        for &byte in data {
            let text = if self.count == 0 {
                format!("{byte:02X}")
            } else {
                format!(" {byte:02X}")
            };
            out.push(Token::El(DisplayElement::Data { text, control: true }));
            self.count += 1;
            if self.count == self.line_width {
                out.push(Token::Close(DisplayElement::LineBreak));
                self.count = 0;
            }
        }
        out
    }

    pub(crate) fn reset_line(&mut self) {
        self.count = 0;
    }

    pub(crate) fn reset(&mut self) {
        self.count = 0;
    }
}
