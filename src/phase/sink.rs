//! Log delivery for the phase engine.
//!
//! The state machine never calls `tracing` directly. It writes through a
//! [`LogSink`], so the same engine can log in-process ([`TracingSink`]) or
//! hand lines to a separate listener over a queue ([`ChannelSink`]) when
//! the loops must not block on log I/O.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, trace, warn};

/// Tracing target used for every phase log line.
pub const PHASE_TARGET: &str = "trialsync::phase";

/// Destination for phase engine log lines.
pub trait LogSink: Send + Sync {
    /// Emits one line at `level`.
    fn log(&self, level: Level, message: &str);
}

/// Shared handle to a log sink.
pub type SharedSink = Arc<dyn LogSink>;

/// One queued log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Severity.
    pub level: Level,
    /// Rendered message.
    pub message: String,
    /// Wall-clock time the line was produced.
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// In-process
// ============================================================================

/// Forwards lines to `tracing` under [`PHASE_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str) {
        emit(level, message);
    }
}

fn emit(level: Level, message: &str) {
    match level {
        Level::ERROR => error!(target: PHASE_TARGET, "{message}"),
        Level::WARN => warn!(target: PHASE_TARGET, "{message}"),
        Level::INFO => info!(target: PHASE_TARGET, "{message}"),
        Level::DEBUG => debug!(target: PHASE_TARGET, "{message}"),
        Level::TRACE => trace!(target: PHASE_TARGET, "{message}"),
    }
}

/// Keeps every line in memory.
///
/// Useful for asserting on engine output and for post-run summaries.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies out every line logged so far.
    #[must_use]
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    /// Messages only, in order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.lines.lock().iter().map(|l| l.message.clone()).collect()
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, message: &str) {
        self.lines.lock().push(LogLine {
            level,
            message: message.to_owned(),
            timestamp: Utc::now(),
        });
    }
}

// ============================================================================
// Queued
// ============================================================================

/// Sends lines over an unbounded queue to a [`LogListener`].
///
/// Sending never blocks. Lines logged after the listener is gone are
/// dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl ChannelSink {
    /// Creates a connected sink and listener pair.
    #[must_use]
    pub fn new() -> (Self, LogListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, LogListener { rx })
    }
}

impl LogSink for ChannelSink {
    fn log(&self, level: Level, message: &str) {
        let line = LogLine {
            level,
            message: message.to_owned(),
            timestamp: Utc::now(),
        };
        if self.tx.send(line).is_err() {
            trace!("log listener closed, dropping phase log line");
        }
    }
}

/// Receiving end of a [`ChannelSink`].
#[derive(Debug)]
pub struct LogListener {
    rx: mpsc::UnboundedReceiver<LogLine>,
}

impl LogListener {
    /// Takes every line queued so far without waiting.
    pub fn drain(&mut self) -> Vec<LogLine> {
        let mut lines = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Moves the listener onto its own thread.
    ///
    /// The thread re-emits every line through `tracing` and exits once
    /// all senders are dropped, returning the number of lines handled.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn(mut self) -> std::io::Result<JoinHandle<usize>> {
        thread::Builder::new()
            .name("phase-log".to_owned())
            .spawn(move || {
                let mut handled = 0;
                while let Some(line) = self.rx.blocking_recv() {
                    emit(line.level, &line.message);
                    handled += 1;
                }
                handled
            })
    }
}
