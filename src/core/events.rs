//! Event serializer
//!
//! Transport read tasks and the send path run on independent tasks; all of
//! them funnel their activity through this single queue so the terminal
//! processor consumes events one at a time, in arrival order. Events from
//! one source keep their relative order; cross-source interleaving is
//! arrival order, not a global clock.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Direction of traffic relative to this end of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Transmitted by us
    Tx,
    /// Received from the remote
    Rx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx => write!(f, "Tx"),
            Self::Rx => write!(f, "Rx"),
        }
    }
}

/// One unit of I/O activity submitted by a producer.
#[derive(Debug, Clone)]
pub enum IoActivity {
    /// Raw payload bytes moved across the line
    Data(Bytes),
    /// The link was established
    Opened,
    /// The link was closed (orderly or after an error)
    Closed,
    /// An I/O error was observed
    IoError(String),
    /// Force the open display line to break (idle flush)
    Break,
}

/// A sequenced chunk handed to the single consumer.
///
/// The sequence number is stamped at submit time and is strictly
/// increasing across all producers of one queue.
#[derive(Debug, Clone)]
pub struct RawChunk {
    /// Global submit order
    pub seq: u64,
    /// Source direction
    pub dir: Direction,
    /// What happened
    pub activity: IoActivity,
}

/// Producer handle; cheap to clone, safe from any task.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<RawChunk>,
    seq: Arc<AtomicU64>,
}

impl EventSink {
    /// Submit one activity record; returns its sequence number.
    ///
    /// Submission never blocks. A dropped consumer makes this a no-op.
    pub fn submit(&self, dir: Direction, activity: IoActivity) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(RawChunk { seq, dir, activity });
        seq
    }
}

/// The single-consumer end of the queue.
pub struct EventSource {
    rx: mpsc::UnboundedReceiver<RawChunk>,
}

impl EventSource {
    /// Await the next chunk; `None` once every sink is gone.
    pub async fn recv(&mut self) -> Option<RawChunk> {
        self.rx.recv().await
    }

    /// Non-blocking variant for tests and drain-on-shutdown.
    pub fn try_recv(&mut self) -> Option<RawChunk> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected sink/source pair.
pub fn channel() -> (EventSink, EventSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSink {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        },
        EventSource { rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_strictly_increasing() {
        let (sink, mut source) = channel();
        sink.submit(Direction::Tx, IoActivity::Data(Bytes::from_static(b"a")));
        sink.submit(Direction::Rx, IoActivity::Data(Bytes::from_static(b"b")));
        sink.submit(Direction::Rx, IoActivity::Closed);

        let mut last = None;
        while let Some(chunk) = source.try_recv() {
            if let Some(prev) = last {
                assert!(chunk.seq > prev);
            }
            last = Some(chunk.seq);
        }
        assert_eq!(last, Some(2));
    }

    #[test]
    fn test_per_source_order_is_preserved() {
        let (sink, mut source) = channel();
        let tx_sink = sink.clone();
        for i in 0..10u8 {
            tx_sink.submit(Direction::Tx, IoActivity::Data(Bytes::copy_from_slice(&[i])));
        }

        let mut seen = Vec::new();
        while let Some(chunk) = source.try_recv() {
            if let IoActivity::Data(b) = chunk.activity {
                seen.push(b[0]);
            }
        }
        assert_eq!(seen, (0..10u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_submit_after_consumer_drop_is_noop() {
        let (sink, source) = channel();
        drop(source);
        sink.submit(Direction::Rx, IoActivity::Opened);
    }
}
