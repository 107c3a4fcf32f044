//! Terminal session
//!
//! A session wires one link to one terminal processor: commands go
//! parser -> flow gate -> channel, incoming chunks go channel -> event
//! serializer -> terminal. The single consumer task spawned here is the
//! only code that touches the terminal, so no two chunks are ever
//! processed concurrently.

use crate::config::{SessionSettings, TerminalMode};
use crate::core::command::{CommandParser, Directive, Keyword, ParseError};
use crate::core::events::{self, Direction, EventSource, IoActivity};
use crate::core::link::{Link, LinkState};
use crate::core::terminal::{DisplayLine, LineNotice, Terminal, View};
use crate::core::transport::{Endpoint, SerialFlowControl, SocketRole, TransportError, TransportStats};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Typed failure surface of session operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The command text was rejected; nothing was transmitted
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    /// The transport refused or lost the operation
    #[error("send failed: {0}")]
    Transport(#[from] TransportError),
}

/// Events broadcast to session subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The link changed lifecycle state
    StateChanged(LinkState),
    /// A display line was completed in one of the views
    LineCompleted(LineNotice),
    /// An I/O error was observed on the link
    IoError(String),
}

/// An active terminal session.
pub struct TerminalSession {
    id: Uuid,
    name: String,
    link: Arc<Link>,
    terminal: Arc<Mutex<Terminal>>,
    parser: CommandParser,
    line_delay: Mutex<Option<Duration>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl TerminalSession {
    /// Start a session from its settings.
    ///
    /// The connection is established asynchronously; subscribe or poll
    /// [`state`](Self::state) to observe it opening. Configuration errors
    /// fail here, once.
    pub fn open(settings: SessionSettings) -> Result<Arc<Self>, EngineError> {
        let (sink, source) = events::channel();

        // Serial ports configured for software flow control use the
        // engine gate as well; the driver never paces.
        let flow_control = settings.software_flow_control
            || matches!(
                &settings.endpoint,
                Endpoint::Serial(c) if c.flow_control == SerialFlowControl::Software
            );

        let link = Link::start(settings.endpoint, settings.reconnect, flow_control, sink)?;
        let terminal = Arc::new(Mutex::new(Terminal::new(&settings.display)));
        let (event_tx, _) = broadcast::channel(1024);

        let idle_flush = match settings.display.mode {
            TerminalMode::Binary => settings.display.binary.idle_flush,
            TerminalMode::Text => None,
        };

        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            name: settings.name,
            link: link.clone(),
            terminal: terminal.clone(),
            parser: CommandParser::new(settings.display.text.charset),
            line_delay: Mutex::new(None),
            event_tx: event_tx.clone(),
        });

        tokio::spawn(consume(source, terminal, link, event_tx, idle_flush));
        Ok(session)
    }

    /// Unique session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Session name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Parse and execute one command.
    ///
    /// A command that fails to parse transmits nothing. An active
    /// line-delay keyword from an earlier command is applied after this
    /// one completes.
    pub async fn transmit(&self, text: &str) -> Result<(), EngineError> {
        let directives = self.parser.parse(text)?;
        debug!(session = %self.id, directives = directives.len(), "command accepted");

        let mut actions = Vec::new();
        flatten(&directives, &mut actions);
        for action in actions {
            match action {
                Directive::Bytes(bytes) => {
                    if !bytes.is_empty() {
                        self.link.send(bytes).await?;
                    }
                }
                Directive::Delay(delay) => tokio::time::sleep(*delay).await,
                Directive::Keyword(Keyword::Clear) => self.terminal.lock().clear(),
                Directive::Keyword(Keyword::LineDelay(delay)) => {
                    *self.line_delay.lock() = Some(*delay);
                }
                Directive::Repeat(..) => unreachable!("repeats are flattened"),
            }
        }

        let pause = *self.line_delay.lock();
        if let Some(pause) = pause {
            tokio::time::sleep(pause).await;
        }
        Ok(())
    }

    /// Send raw bytes, bypassing the command grammar (still flow-gated).
    pub async fn send_bytes(&self, data: &[u8]) -> Result<usize, EngineError> {
        Ok(self.link.send(data).await?)
    }

    /// Snapshot of one view's display lines.
    pub fn snapshot(&self, view: View) -> Vec<DisplayLine> {
        self.terminal.lock().snapshot(view)
    }

    /// Line count of one view.
    pub fn line_count(&self, view: View) -> usize {
        self.terminal.lock().line_count(view)
    }

    /// Clear all display repositories.
    pub fn clear(&self) {
        self.terminal.lock().clear();
    }

    /// Human-readable endpoint description.
    pub async fn peer_info(&self) -> String {
        self.link.peer_info().await
    }

    /// Channel counters since the last open.
    pub async fn stats(&self) -> TransportStats {
        self.link.stats().await
    }

    /// Negotiated socket role, for auto-socket sessions.
    pub async fn role(&self) -> Option<SocketRole> {
        self.link.role().await
    }

    /// Bytes currently held by the flow gate.
    pub fn flow_pending(&self) -> usize {
        self.link.flow_pending()
    }

    /// Stop the session. Idempotent.
    pub fn close(&self) {
        self.link.stop();
    }
}

/// Expand repeats into a flat execution sequence, preserving order.
fn flatten<'a>(directives: &'a [Directive], out: &mut Vec<&'a Directive>) {
    for directive in directives {
        match directive {
            Directive::Repeat(count, inner) => {
                for _ in 0..*count {
                    flatten(inner, out);
                }
            }
            other => out.push(other),
        }
    }
}

/// The single consumer: drains the serializer, drives the terminal and
/// republishes lifecycle activity as session events.
async fn consume(
    mut source: EventSource,
    terminal: Arc<Mutex<Terminal>>,
    link: Arc<Link>,
    event_tx: broadcast::Sender<SessionEvent>,
    idle_flush: Option<Duration>,
) {
    loop {
        let chunk = match idle_flush {
            Some(window) => match tokio::time::timeout(window, source.recv()).await {
                Ok(chunk) => chunk,
                Err(_) => {
                    // Receive silence: flush partial binary lines
                    let notices = {
                        let mut term = terminal.lock();
                        let mut notices = term.force_break(Direction::Rx);
                        notices.extend(term.force_break(Direction::Tx));
                        notices
                    };
                    for notice in notices {
                        let _ = event_tx.send(SessionEvent::LineCompleted(notice));
                    }
                    continue;
                }
            },
            None => source.recv().await,
        };
        let Some(chunk) = chunk else { break };

        match &chunk.activity {
            IoActivity::Data(_) | IoActivity::Break => {
                let notices = terminal.lock().process(&chunk);
                for notice in notices {
                    let _ = event_tx.send(SessionEvent::LineCompleted(notice));
                }
            }
            IoActivity::Opened => {
                let _ = event_tx.send(SessionEvent::StateChanged(LinkState::Opened));
            }
            IoActivity::Closed => {
                let _ = event_tx.send(SessionEvent::StateChanged(link.state()));
            }
            IoActivity::IoError(message) => {
                let _ = event_tx.send(SessionEvent::IoError(message.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::TcpClientConfig;

    fn idle_settings() -> SessionSettings {
        // A link that stays parked in reconnect backoff; good enough for
        // everything that never needs an open connection
        SessionSettings::new(
            "test",
            Endpoint::TcpClient(TcpClientConfig::new("127.0.0.1", 1)),
        )
    }

    #[tokio::test]
    async fn test_parse_failure_transmits_nothing() {
        let session = TerminalSession::open(idle_settings()).unwrap();
        let err = session.transmit("AB\\<Nope\\>CD").await.unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
        assert_eq!(session.line_count(View::Tx), 0);
        session.close();
    }

    #[tokio::test]
    async fn test_send_while_unconnected_fails_fast() {
        let session = TerminalSession::open(idle_settings()).unwrap();
        let err = session.transmit("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Transport(TransportError::NotConnected)
        ));
        session.close();
    }

    #[tokio::test]
    async fn test_clear_keyword_needs_no_connection() {
        let session = TerminalSession::open(idle_settings()).unwrap();
        session.transmit("\\<Clear\\>").await.unwrap();
        assert_eq!(session.line_count(View::Bidir), 0);
        session.close();
    }

    #[test]
    fn test_flatten_expands_repeats_in_order() {
        let directives = vec![
            Directive::Bytes(b"a".to_vec()),
            Directive::Repeat(
                2,
                vec![
                    Directive::Bytes(b"b".to_vec()),
                    Directive::Delay(Duration::from_millis(1)),
                ],
            ),
            Directive::Bytes(b"c".to_vec()),
        ];
        let mut flat = Vec::new();
        flatten(&directives, &mut flat);
        let shape: Vec<&str> = flat
            .iter()
            .map(|d| match d {
                Directive::Bytes(_) => "bytes",
                Directive::Delay(_) => "delay",
                _ => "other",
            })
            .collect();
        assert_eq!(
            shape,
            vec!["bytes", "bytes", "delay", "bytes", "delay", "bytes"]
        );
    }
}
