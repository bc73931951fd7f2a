//! Phase engine
//!
//! Runs a trial as a sequence of named phases, each with its own
//! [`DurationPolicy`], and coordinates phase ends across concurrent loops.
//!
//! # Architecture
//!
//! - [`DurationTable`]: phase name to duration policy
//! - [`State`]: one live phase with its timer and single-shot registry
//! - [`Syncer`]: cross-loop completion barrier
//! - [`StateMachine`]: transition gates, logging, watchdog
//! - [`LogSink`]: where the machine's log lines go

pub mod machine;
pub mod policy;
pub mod sink;
pub mod state;
pub mod syncer;

pub use machine::{CompletedPhase, StateMachine, TransitionResult, WatchdogAction};
pub use policy::{DurationPolicy, DurationTable};
pub use sink::{ChannelSink, LogListener, LogSink, MemorySink, SharedSink, TracingSink};
pub use state::State;
pub use syncer::{ParticipantId, Syncer};
