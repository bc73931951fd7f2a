//! Structured event stream.
//!
//! Discrete, typed events emitted while a protocol runs. Events are
//! serialized as newline-delimited JSON (JSONL) with a monotonically
//! increasing sequence number.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// All configured trials finished.
    Completed,
    /// The input source asked to quit.
    QuitRequested,
    /// The process was interrupted (Ctrl+C or SIGTERM).
    Cancelled,
    /// A loop failed.
    Error,
}

/// A discrete event emitted during a run.
///
/// Tagged with `"type"` when serialized so consumers can dispatch on the
/// event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The runner started.
    RunStarted {
        /// When the run started.
        timestamp: DateTime<Utc>,
        /// Identifier shared by every event of this run.
        run_id: Uuid,
        /// Experiment name from the protocol.
        experiment: String,
        /// Number of trials the runner will execute.
        trials: u32,
    },

    /// A phase was entered.
    PhaseEntered {
        /// When the phase was entered.
        timestamp: DateTime<Utc>,
        /// One-based trial number.
        trial: u32,
        /// Phase name.
        phase: String,
        /// Onset relative to the run start, in milliseconds.
        onset_ms: f64,
    },

    /// A phase ended.
    PhaseCompleted {
        /// When the phase ended.
        timestamp: DateTime<Utc>,
        /// One-based trial number.
        trial: u32,
        /// Phase that ended.
        phase: String,
        /// Time the phase ran, in milliseconds.
        duration_ms: f64,
        /// Phase that follows.
        next: String,
        /// `true` if the phase was skipped by the operator.
        forced: bool,
    },

    /// A trial's final phase completed.
    TrialCompleted {
        /// When the trial ended.
        timestamp: DateTime<Utc>,
        /// One-based trial number.
        trial: u32,
        /// Response time in the trial's response phase, if any.
        response_ms: Option<f64>,
    },

    /// The barrier watchdog expired for a phase.
    BarrierStalled {
        /// When the stall was detected.
        timestamp: DateTime<Utc>,
        /// Phase whose barrier is still closed.
        phase: String,
        /// Participants that acknowledged.
        acknowledged: usize,
        /// Participants the barrier waits for.
        expected: usize,
    },

    /// The runner stopped.
    RunStopped {
        /// When the run stopped.
        timestamp: DateTime<Utc>,
        /// Why the run stopped.
        reason: StopReason,
        /// Trials completed before stopping.
        trials_completed: u32,
    },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each [`emit`](Self::emit) takes the next sequence number, writes one
/// JSON line and flushes. Serialization or I/O failures are dropped:
/// observability must never stop a trial.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
