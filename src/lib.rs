//! `trialsync` - multi-phase trial state machine with cross-loop
//! synchronization
//!
//! A trial is a sequence of named phases. Each phase ends when its
//! duration policy allows it and, optionally, when every participating
//! loop has acknowledged it. The [`phase::StateMachine`] enforces both
//! gates; the [`driver`] runs a fast logic loop and a frame-paced graphics
//! loop against one shared machine.

pub mod cli;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod observability;
pub mod phase;
pub mod singleshot;
pub mod timer;
