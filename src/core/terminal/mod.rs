//! Terminal processor
//!
//! Reassembles the chunked bidirectional byte stream into typed display
//! lines. Chunks arrive one at a time from the event serializer; each
//! `process` call emits zero or more closed lines and mutates at most
//! one open line per repository.
//!
//! Three repositories are kept: Tx-only, Rx-only and a combined Bidir
//! view. Bytes are written to both their direction's repository and the
//! Bidir repository as they are processed (dual-write, not merge-on-read)
//! so each view evicts against its own capacity independently.

mod binary;
mod text;

use binary::BinaryScanner;
use text::TextScanner;

use crate::config::{DisplaySettings, TerminalMode};
use crate::core::events::{Direction, IoActivity, RawChunk};
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use tracing::trace;

/// Which repository a reader is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    /// Transmitted data only
    Tx,
    /// Transmit and receive combined
    Bidir,
    /// Received data only
    Rx,
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx => write!(f, "Tx"),
            Self::Bidir => write!(f, "Bidir"),
            Self::Rx => write!(f, "Rx"),
        }
    }
}

/// The smallest typed unit of rendered terminal output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayElement {
    /// A run of displayable text
    Data {
        /// Rendered text
        text: String,
        /// Whether this run renders control data rather than payload text
        control: bool,
    },
    /// A control character rendered per the configured radix
    ControlGlyph(String),
    /// Inline decode failure; the stream continues after it
    Error(String),
    /// Line closed by a recognized EOL (or the binary line grammar)
    LineBreak,
    /// Line forced closed by length, idle or direction policy
    LineBreakImplicit,
}

impl DisplayElement {
    /// Whether this element terminates a line.
    pub fn is_break(&self) -> bool {
        matches!(self, Self::LineBreak | Self::LineBreakImplicit)
    }
}

/// An ordered run of display elements for one direction.
#[derive(Debug, Clone)]
pub struct DisplayLine {
    /// Elements in append order
    pub elements: Vec<DisplayElement>,
    /// Direction the line's bytes were observed on
    pub direction: Direction,
    /// When the line was opened
    pub opened_at: DateTime<Local>,
    /// True once an EOL was recognized or the line was forced to break
    pub closed: bool,
}

impl DisplayLine {
    fn new(direction: Direction) -> Self {
        Self {
            elements: Vec::new(),
            direction,
            opened_at: Local::now(),
            closed: false,
        }
    }

    /// Visible text of the line: data runs and control glyphs, without
    /// break markers or error annotations.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for element in &self.elements {
            match element {
                DisplayElement::Data { text, .. } => out.push_str(text),
                DisplayElement::ControlGlyph(glyph) => out.push_str(glyph),
                _ => {}
            }
        }
        out
    }

    /// Whether the line has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Capacity-bounded ordered store of display lines for one view.
///
/// Mutated only by the terminal processor; read through [`snapshot`].
///
/// [`snapshot`]: Repository::snapshot
#[derive(Debug)]
pub struct Repository {
    lines: VecDeque<DisplayLine>,
    capacity: usize,
}

impl Repository {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Number of lines currently stored (open line included).
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the repository holds no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Configured line capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clone the current lines for a reader.
    pub fn snapshot(&self) -> Vec<DisplayLine> {
        self.lines.iter().cloned().collect()
    }

    fn clear(&mut self) {
        self.lines.clear();
    }

    fn has_open_line(&self) -> bool {
        self.lines.back().is_some_and(|l| !l.closed)
    }

    fn open_direction(&self) -> Option<Direction> {
        self.lines.back().filter(|l| !l.closed).map(|l| l.direction)
    }

    fn open_line(&mut self, direction: Direction) -> &mut DisplayLine {
        if !self.has_open_line() {
            if self.lines.len() == self.capacity {
                self.lines.pop_front();
                trace!(capacity = self.capacity, "evicted oldest display line");
            }
            self.lines.push_back(DisplayLine::new(direction));
        }
        self.lines.back_mut().expect("open line present")
    }

    fn append(&mut self, direction: Direction, element: DisplayElement) {
        self.open_line(direction).elements.push(element);
    }

    /// Close the open line (opening an empty one first if needed, so a
    /// bare EOL still yields a blank closed line).
    fn close(&mut self, direction: Direction, brk: DisplayElement) -> DisplayLine {
        let line = self.open_line(direction);
        line.elements.push(brk);
        line.closed = true;
        line.clone()
    }

    /// Close the open line if there is one.
    fn force_close(&mut self, brk: DisplayElement) -> Option<DisplayLine> {
        let line = self.lines.back_mut().filter(|l| !l.closed)?;
        line.elements.push(brk);
        line.closed = true;
        Some(line.clone())
    }
}

/// A completed-line notification for the view layer.
#[derive(Debug, Clone)]
pub struct LineNotice {
    /// The repository the line was closed in
    pub view: View,
    /// The closed line
    pub line: DisplayLine,
}

/// Per-direction byte scanner, one variant per terminal mode.
enum Scanner {
    Text(TextScanner),
    Binary(BinaryScanner),
}

impl Scanner {
    fn scan(&mut self, data: &[u8]) -> Vec<Token> {
        match self {
            Self::Text(s) => s.scan(data),
            Self::Binary(s) => s.scan(data),
        }
    }

    fn flush(&mut self) -> Vec<Token> {
        match self {
            Self::Text(s) => s.flush(),
            Self::Binary(_) => Vec::new(),
        }
    }

    fn reset_line(&mut self) {
        match self {
            Self::Text(s) => s.reset_line(),
            Self::Binary(s) => s.reset_line(),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Text(s) => s.reset(),
            Self::Binary(s) => s.reset(),
        }
    }
}

/// Scanner output: either an element for the open line or a line close.
pub(crate) enum Token {
    El(DisplayElement),
    Close(DisplayElement),
}

/// The stream reassembler: consumes sequenced chunks, maintains the three
/// repositories, and reports each completed line.
pub struct Terminal {
    tx_scanner: Scanner,
    rx_scanner: Scanner,
    tx: Repository,
    rx: Repository,
    bidir: Repository,
}

impl Terminal {
    /// Build a terminal for the given display settings.
    pub fn new(settings: &DisplaySettings) -> Self {
        let make_scanner = || match settings.mode {
            TerminalMode::Text => Scanner::Text(TextScanner::new(settings.text.clone())),
            TerminalMode::Binary => Scanner::Binary(BinaryScanner::new(settings.binary.line_width)),
        };
        Self {
            tx_scanner: make_scanner(),
            rx_scanner: make_scanner(),
            tx: Repository::new(settings.capacity),
            rx: Repository::new(settings.capacity),
            bidir: Repository::new(settings.capacity),
        }
    }

    /// Apply one sequenced chunk. Returns the lines it completed.
    ///
    /// Lifecycle activities (`Opened`/`Closed`/`IoError`) do not touch the
    /// repositories; they are surfaced by the session instead.
    pub fn process(&mut self, chunk: &RawChunk) -> Vec<LineNotice> {
        match &chunk.activity {
            IoActivity::Data(bytes) => {
                let tokens = self.scanner_mut(chunk.dir).scan(bytes);
                self.apply(chunk.dir, tokens)
            }
            IoActivity::Break => self.force_break(chunk.dir),
            _ => Vec::new(),
        }
    }

    /// Force the open line of one direction closed (idle flush, explicit
    /// break directive).
    pub fn force_break(&mut self, dir: Direction) -> Vec<LineNotice> {
        let tokens = self.scanner_mut(dir).flush();
        let mut notices = self.apply(dir, tokens);
        self.scanner_mut(dir).reset_line();

        let repo = self.repo_mut(dir);
        if let Some(line) = repo.force_close(DisplayElement::LineBreakImplicit) {
            notices.push(LineNotice {
                view: view_of(dir),
                line,
            });
        }
        if self.bidir.open_direction() == Some(dir) {
            if let Some(line) = self.bidir.force_close(DisplayElement::LineBreakImplicit) {
                notices.push(LineNotice {
                    view: View::Bidir,
                    line,
                });
            }
        }
        notices
    }

    /// Empty all repositories and reset reassembly state.
    pub fn clear(&mut self) {
        self.tx.clear();
        self.rx.clear();
        self.bidir.clear();
        self.tx_scanner.reset();
        self.rx_scanner.reset();
    }

    /// Clone the lines of one view for a reader.
    pub fn snapshot(&self, view: View) -> Vec<DisplayLine> {
        match view {
            View::Tx => self.tx.snapshot(),
            View::Bidir => self.bidir.snapshot(),
            View::Rx => self.rx.snapshot(),
        }
    }

    /// Line count of one view.
    pub fn line_count(&self, view: View) -> usize {
        match view {
            View::Tx => self.tx.len(),
            View::Bidir => self.bidir.len(),
            View::Rx => self.rx.len(),
        }
    }

    fn scanner_mut(&mut self, dir: Direction) -> &mut Scanner {
        match dir {
            Direction::Tx => &mut self.tx_scanner,
            Direction::Rx => &mut self.rx_scanner,
        }
    }

    fn repo_mut(&mut self, dir: Direction) -> &mut Repository {
        match dir {
            Direction::Tx => &mut self.tx,
            Direction::Rx => &mut self.rx,
        }
    }

    fn apply(&mut self, dir: Direction, tokens: Vec<Token>) -> Vec<LineNotice> {
        let mut notices = Vec::new();
        for token in tokens {
            // The bidir view breaks its open line when direction flips.
            if self.bidir.has_open_line() && self.bidir.open_direction() != Some(dir) {
                if let Some(line) = self.bidir.force_close(DisplayElement::LineBreakImplicit) {
                    notices.push(LineNotice {
                        view: View::Bidir,
                        line,
                    });
                }
            }

            match token {
                Token::El(element) => {
                    self.repo_mut(dir).append(dir, element.clone());
                    self.bidir.append(dir, element);
                }
                Token::Close(brk) => {
                    let line = self.repo_mut(dir).close(dir, brk.clone());
                    notices.push(LineNotice {
                        view: view_of(dir),
                        line,
                    });
                    let line = self.bidir.close(dir, brk);
                    notices.push(LineNotice {
                        view: View::Bidir,
                        line,
                    });
                }
            }
        }
        notices
    }
}

fn view_of(dir: Direction) -> View {
    match dir {
        Direction::Tx => View::Tx,
        Direction::Rx => View::Rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BinarySettings, DisplaySettings, TerminalMode};
    use bytes::Bytes;

    fn chunk(seq: u64, dir: Direction, data: &[u8]) -> RawChunk {
        RawChunk {
            seq,
            dir,
            activity: IoActivity::Data(Bytes::copy_from_slice(data)),
        }
    }

    fn text_terminal() -> Terminal {
        Terminal::new(&DisplaySettings::default())
    }

    fn binary_terminal(width: usize) -> Terminal {
        let settings = DisplaySettings {
            mode: TerminalMode::Binary,
            binary: BinarySettings::default().line_width(width),
            ..DisplaySettings::default()
        };
        Terminal::new(&settings)
    }

    #[test]
    fn test_eol_split_across_chunks() {
        let mut term = text_terminal();
        term.process(&chunk(0, Direction::Rx, b"hello\r"));
        let notices = term.process(&chunk(1, Direction::Rx, b"\nworld"));

        let closed: Vec<_> = notices.iter().filter(|n| n.view == View::Rx).collect();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].line.text(), "hello");

        let lines = term.snapshot(View::Rx);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].is_closed());
        assert!(!lines[1].is_closed());
        assert_eq!(lines[1].text(), "world");
    }

    #[test]
    fn test_chunk_split_invariance() {
        let stream = b"alpha\r\nbeta\r\ngamma";
        let collect = |splits: &[usize]| {
            let mut term = text_terminal();
            let mut seq = 0;
            let mut start = 0;
            for &end in splits {
                term.process(&chunk(seq, Direction::Rx, &stream[start..end]));
                seq += 1;
                start = end;
            }
            term.process(&chunk(seq, Direction::Rx, &stream[start..]));
            term.snapshot(View::Rx)
                .iter()
                .map(|l| (l.text(), l.is_closed()))
                .collect::<Vec<_>>()
        };

        let whole = collect(&[]);
        for split in 1..stream.len() {
            assert_eq!(collect(&[split]), whole, "split at {split}");
        }
        // Split straddling both EOL bytes
        assert_eq!(collect(&[6, 7, 13]), whole);
    }

    #[test]
    fn test_binary_line_width() {
        let mut term = binary_terminal(2);
        term.process(&chunk(0, Direction::Rx, &[0x41, 0x42]));
        term.process(&chunk(1, Direction::Rx, &[0x43]));

        let lines = term.snapshot(View::Rx);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].is_closed());
        assert_eq!(lines[0].text(), "41 42");
        assert!(!lines[1].is_closed());
        assert_eq!(lines[1].text(), "43");
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let settings = DisplaySettings::default().capacity(3);
        let mut term = Terminal::new(&settings);
        for i in 0..5u8 {
            let data = format!("line{i}\r\n");
            term.process(&chunk(u64::from(i), Direction::Rx, data.as_bytes()));
        }
        let lines = term.snapshot(View::Rx);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text(), "line2");
        assert_eq!(lines[2].text(), "line4");
    }

    #[test]
    fn test_dual_write_and_direction_flip() {
        let mut term = text_terminal();
        term.process(&chunk(0, Direction::Tx, b"ping"));
        let notices = term.process(&chunk(1, Direction::Rx, b"pong\r\n"));

        // The open Tx line in the bidir view is closed by the flip.
        assert!(notices
            .iter()
            .any(|n| n.view == View::Bidir && n.line.direction == Direction::Tx));

        assert_eq!(term.line_count(View::Tx), 1);
        assert_eq!(term.line_count(View::Rx), 1);
        assert_eq!(term.line_count(View::Bidir), 2);

        let bidir = term.snapshot(View::Bidir);
        assert_eq!(bidir[0].text(), "ping");
        assert_eq!(bidir[0].direction, Direction::Tx);
        assert!(bidir[0].is_closed());
        assert_eq!(bidir[1].text(), "pong");
        assert_eq!(bidir[1].direction, Direction::Rx);
    }

    #[test]
    fn test_break_activity_closes_open_line() {
        let mut term = binary_terminal(16);
        term.process(&chunk(0, Direction::Rx, &[0x01, 0x02]));
        let notices = term.process(&RawChunk {
            seq: 1,
            dir: Direction::Rx,
            activity: IoActivity::Break,
        });
        assert_eq!(notices.len(), 2); // Rx + Bidir
        let lines = term.snapshot(View::Rx);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].is_closed());
        assert_eq!(
            lines[0].elements.last(),
            Some(&DisplayElement::LineBreakImplicit)
        );
    }

    #[test]
    fn test_clear_empties_all_views() {
        let mut term = text_terminal();
        term.process(&chunk(0, Direction::Rx, b"abc\r\n"));
        term.process(&chunk(1, Direction::Tx, b"def"));
        term.clear();
        assert_eq!(term.line_count(View::Tx), 0);
        assert_eq!(term.line_count(View::Rx), 0);
        assert_eq!(term.line_count(View::Bidir), 0);
    }
}
