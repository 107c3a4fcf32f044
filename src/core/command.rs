//! Command parser
//!
//! Compiles user-authored command text into a sequence of transmit
//! directives. Plain text becomes [`Directive::Bytes`] after charset
//! encoding; `\<...\>` escapes carry keywords: timed delays, nested
//! repeats, display clear, ASCII control mnemonics by name and literal
//! hex bytes by value.
//!
//! A command either parses completely or not at all: any error rejects
//! the whole command with the offending byte position, so no partial
//! directive sequence ever reaches a transport.

use crate::config::Charset;
use crate::core::ascii;
use std::time::Duration;
use thiserror::Error;

/// Grammar revision understood by this parser. Commands written for a
/// newer grammar are rejected through [`ParseError::UnknownKeyword`]
/// rather than silently ignored.
pub const GRAMMAR_VERSION: u32 = 1;

/// Opening escape marker.
const ESCAPE_OPEN: &str = "\\<";
/// Closing escape marker.
const ESCAPE_CLOSE: &str = "\\>";

/// Upper bound for delay arguments, in milliseconds (one hour).
const MAX_DELAY_MS: u64 = 3_600_000;
/// Upper bound for repeat counts.
const MAX_REPEAT: u64 = 10_000;

/// Keyword directives without a dedicated variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyword {
    /// Clear all display repositories
    Clear,
    /// Pause applied after each subsequently transmitted line
    LineDelay(Duration),
}

/// One compiled transmit directive. Consumed in order, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Literal bytes to hand to the transport
    Bytes(Vec<u8>),
    /// Pause before the next directive
    Delay(Duration),
    /// Repeat the inner directives a fixed number of times
    Repeat(u32, Vec<Directive>),
    /// Non-transmitting keyword action
    Keyword(Keyword),
}

/// Command rejection, carrying the byte offset of the offending input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// An escape was opened but never closed
    #[error("unterminated escape sequence at byte {position}")]
    UnterminatedEscape {
        /// Offset of the opening marker
        position: usize,
    },

    /// The keyword name is not part of this grammar
    #[error("unknown keyword `{name}` at byte {position}")]
    UnknownKeyword {
        /// Offset of the name
        position: usize,
        /// The rejected name
        name: String,
    },

    /// A keyword is missing a required argument
    #[error("keyword `{keyword}` is missing an argument at byte {position}")]
    MissingArgument {
        /// Offset of the keyword
        position: usize,
        /// The keyword concerned
        keyword: &'static str,
    },

    /// An argument does not parse or is not accepted by the keyword
    #[error("invalid argument `{value}` for `{keyword}` at byte {position}")]
    InvalidArgument {
        /// Offset of the keyword
        position: usize,
        /// The keyword concerned
        keyword: &'static str,
        /// The offending argument text
        value: String,
    },

    /// A numeric argument is outside the keyword's declared range
    #[error("argument {value} out of range for `{keyword}` (0..={max}) at byte {position}")]
    OutOfRange {
        /// Offset of the keyword
        position: usize,
        /// The keyword concerned
        keyword: &'static str,
        /// The rejected value
        value: u64,
        /// Inclusive maximum
        max: u64,
    },

    /// Literal text cannot be represented in the configured charset
    #[error("text not representable as {charset} at byte {position}")]
    Unencodable {
        /// Offset of the offending character
        position: usize,
        /// Name of the active charset
        charset: &'static str,
    },
}

/// Compiles command text into directives for one terminal session.
#[derive(Debug, Clone)]
pub struct CommandParser {
    charset: Charset,
}

impl CommandParser {
    /// Create a parser encoding literal runs with the given charset.
    pub fn new(charset: Charset) -> Self {
        Self { charset }
    }

    /// Parse a complete command. Deterministic: the same text always
    /// yields the same directive sequence or the same error.
    pub fn parse(&self, text: &str) -> Result<Vec<Directive>, ParseError> {
        self.parse_at(text, 0)
    }

    fn parse_at(&self, text: &str, base: usize) -> Result<Vec<Directive>, ParseError> {
        let bytes = text.as_bytes();
        let mut directives = Vec::new();
        let mut literal_start = 0;
        let mut i = 0;

        while i < text.len() {
            // The marker is pure ASCII, so slicing at a `\` is always a
            // char boundary even in multi-byte literal text.
            if bytes[i] == b'\\' && text[i..].starts_with(ESCAPE_OPEN) {
                if literal_start < i {
                    directives.push(self.encode_literal(&text[literal_start..i], base + literal_start)?);
                }

                let close = find_balanced_close(&text[i..])
                    .ok_or(ParseError::UnterminatedEscape { position: base + i })?;
                let token = &text[i + ESCAPE_OPEN.len()..i + close];
                directives.push(self.parse_keyword(token, base + i + ESCAPE_OPEN.len())?);

                i += close + ESCAPE_CLOSE.len();
                literal_start = i;
            } else {
                i += 1;
            }
        }

        if literal_start < text.len() {
            directives.push(self.encode_literal(&text[literal_start..], base + literal_start)?);
        }
        Ok(directives)
    }

    /// Encode a literal run per the configured charset.
    fn encode_literal(&self, run: &str, base: usize) -> Result<Directive, ParseError> {
        match self.charset {
            Charset::Utf8 => Ok(Directive::Bytes(run.as_bytes().to_vec())),
            Charset::Ascii => {
                let mut bytes = Vec::with_capacity(run.len());
                for (off, ch) in run.char_indices() {
                    if !ch.is_ascii() {
                        return Err(ParseError::Unencodable {
                            position: base + off,
                            charset: "ASCII",
                        });
                    }
                    bytes.push(ch as u8);
                }
                Ok(Directive::Bytes(bytes))
            }
            Charset::Latin1 => {
                let mut bytes = Vec::with_capacity(run.len());
                for (off, ch) in run.char_indices() {
                    let code = ch as u32;
                    if code > 0xFF {
                        return Err(ParseError::Unencodable {
                            position: base + off,
                            charset: "Latin-1",
                        });
                    }
                    bytes.push(code as u8);
                }
                Ok(Directive::Bytes(bytes))
            }
        }
    }

    /// Resolve one escape token, `pos` pointing at the name.
    fn parse_keyword(&self, token: &str, pos: usize) -> Result<Directive, ParseError> {
        let (name, args) = match token.find(':') {
            Some(idx) => (&token[..idx], Some(&token[idx + 1..])),
            None => (token, None),
        };

        // Named keywords first, longest name wins over a shorter prefix.
        for &candidate in &["LineDelay", "Repeat", "Delay", "Clear"] {
            if name.eq_ignore_ascii_case(candidate) {
                return self.apply_keyword(candidate, args, pos, token);
            }
        }

        // ASCII control mnemonic by name.
        if let Some(byte) = ascii::byte_for(name) {
            if args.is_some() {
                return Err(ParseError::InvalidArgument {
                    position: pos,
                    keyword: "mnemonic",
                    value: token.to_string(),
                });
            }
            return Ok(Directive::Bytes(vec![byte]));
        }

        // Literal hex byte by value.
        if let Some(hex) = name.strip_prefix("0x").or_else(|| name.strip_prefix("0X")) {
            if args.is_some() {
                return Err(ParseError::InvalidArgument {
                    position: pos,
                    keyword: "hex byte",
                    value: token.to_string(),
                });
            }
            return u8::from_str_radix(hex, 16)
                .map(|b| Directive::Bytes(vec![b]))
                .map_err(|_| ParseError::InvalidArgument {
                    position: pos,
                    keyword: "hex byte",
                    value: name.to_string(),
                });
        }

        Err(ParseError::UnknownKeyword {
            position: pos,
            name: name.to_string(),
        })
    }

    fn apply_keyword(
        &self,
        keyword: &'static str,
        args: Option<&str>,
        pos: usize,
        token: &str,
    ) -> Result<Directive, ParseError> {
        match keyword {
            "Clear" => {
                if args.is_some() {
                    return Err(ParseError::InvalidArgument {
                        position: pos,
                        keyword,
                        value: token.to_string(),
                    });
                }
                Ok(Directive::Keyword(Keyword::Clear))
            }
            "Delay" | "LineDelay" => {
                let raw = args.ok_or(ParseError::MissingArgument { position: pos, keyword })?;
                let ms = parse_number(raw, keyword, pos)?;
                if ms > MAX_DELAY_MS {
                    return Err(ParseError::OutOfRange {
                        position: pos,
                        keyword,
                        value: ms,
                        max: MAX_DELAY_MS,
                    });
                }
                let duration = Duration::from_millis(ms);
                if keyword == "Delay" {
                    Ok(Directive::Delay(duration))
                } else {
                    Ok(Directive::Keyword(Keyword::LineDelay(duration)))
                }
            }
            "Repeat" => {
                let raw = args.ok_or(ParseError::MissingArgument { position: pos, keyword })?;
                let (count_text, body) = match raw.find(':') {
                    Some(idx) => (&raw[..idx], &raw[idx + 1..]),
                    None => return Err(ParseError::MissingArgument { position: pos, keyword }),
                };
                let count = parse_number(count_text, keyword, pos)?;
                if count > MAX_REPEAT {
                    return Err(ParseError::OutOfRange {
                        position: pos,
                        keyword,
                        value: count,
                        max: MAX_REPEAT,
                    });
                }
                // The body is command text in its own right; escape pairs
                // nest, so the balanced scan above already kept it intact.
                let body_base = pos + token.len() - body.len();
                let inner = self.parse_at(body, body_base)?;
                Ok(Directive::Repeat(count as u32, inner))
            }
            _ => unreachable!("keyword table and dispatch out of sync"),
        }
    }
}

/// Locate the `\>` matching the `\<` at the start of `text`, honoring
/// nesting. Returns the byte offset of the closing marker.
fn find_balanced_close(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        let pair = if i + 1 < bytes.len() && bytes[i] == b'\\' {
            Some(bytes[i + 1])
        } else {
            None
        };
        match pair {
            Some(b'<') => {
                depth += 1;
                i += 2;
            }
            Some(b'>') => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    None
}

fn parse_number(raw: &str, keyword: &'static str, pos: usize) -> Result<u64, ParseError> {
    raw.trim().parse::<u64>().map_err(|_| ParseError::InvalidArgument {
        position: pos,
        keyword,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CommandParser {
        CommandParser::new(Charset::Utf8)
    }

    #[test]
    fn test_plain_text() {
        let directives = parser().parse("hello").unwrap();
        assert_eq!(directives, vec![Directive::Bytes(b"hello".to_vec())]);
    }

    #[test]
    fn test_delay_between_literals() {
        let directives = parser().parse("AB\\<Delay:100\\>CD").unwrap();
        assert_eq!(
            directives,
            vec![
                Directive::Bytes(b"AB".to_vec()),
                Directive::Delay(Duration::from_millis(100)),
                Directive::Bytes(b"CD".to_vec()),
            ]
        );
    }

    #[test]
    fn test_parse_is_deterministic() {
        let text = "x\\<Repeat:3:y\\<Delay:5\\>\\>z";
        assert_eq!(parser().parse(text).unwrap(), parser().parse(text).unwrap());
    }

    #[test]
    fn test_nested_repeat() {
        let directives = parser().parse("\\<Repeat:2:A\\<Delay:5\\>\\>").unwrap();
        assert_eq!(
            directives,
            vec![Directive::Repeat(
                2,
                vec![
                    Directive::Bytes(b"A".to_vec()),
                    Directive::Delay(Duration::from_millis(5)),
                ]
            )]
        );
    }

    #[test]
    fn test_mnemonic_and_hex() {
        let directives = parser().parse("\\<CR\\>\\<LF\\>\\<0x41\\>").unwrap();
        assert_eq!(
            directives,
            vec![
                Directive::Bytes(vec![0x0D]),
                Directive::Bytes(vec![0x0A]),
                Directive::Bytes(vec![0x41]),
            ]
        );
    }

    #[test]
    fn test_keyword_names_are_case_insensitive() {
        let directives = parser().parse("\\<delay:10\\>\\<CLEAR\\>").unwrap();
        assert_eq!(
            directives,
            vec![
                Directive::Delay(Duration::from_millis(10)),
                Directive::Keyword(Keyword::Clear),
            ]
        );
    }

    #[test]
    fn test_line_delay_keyword() {
        let directives = parser().parse("\\<LineDelay:250\\>").unwrap();
        assert_eq!(
            directives,
            vec![Directive::Keyword(Keyword::LineDelay(Duration::from_millis(250)))]
        );
    }

    #[test]
    fn test_unterminated_escape_rejects_whole_command() {
        let err = parser().parse("AB\\<Delay:5").unwrap_err();
        assert_eq!(err, ParseError::UnterminatedEscape { position: 2 });
    }

    #[test]
    fn test_unknown_keyword_carries_position() {
        let err = parser().parse("AB\\<Bogus:1\\>").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownKeyword {
                position: 4,
                name: "Bogus".to_string()
            }
        );
    }

    #[test]
    fn test_out_of_range_is_rejected_not_clamped() {
        let err = parser().parse("\\<Repeat:999999:x\\>").unwrap_err();
        assert!(matches!(err, ParseError::OutOfRange { keyword: "Repeat", .. }));

        let err = parser().parse("\\<Delay:999999999\\>").unwrap_err();
        assert!(matches!(err, ParseError::OutOfRange { keyword: "Delay", .. }));
    }

    #[test]
    fn test_repeat_requires_body() {
        let err = parser().parse("\\<Repeat:3\\>").unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingArgument {
                position: 2,
                keyword: "Repeat"
            }
        );
    }

    #[test]
    fn test_ascii_charset_rejects_non_ascii_literal() {
        let parser = CommandParser::new(Charset::Ascii);
        let err = parser.parse("caf\u{e9}").unwrap_err();
        assert_eq!(
            err,
            ParseError::Unencodable {
                position: 3,
                charset: "ASCII"
            }
        );
    }

    #[test]
    fn test_latin1_charset_encodes_high_bytes() {
        let parser = CommandParser::new(Charset::Latin1);
        let directives = parser.parse("\u{e9}").unwrap();
        assert_eq!(directives, vec![Directive::Bytes(vec![0xE9])]);
    }
}
