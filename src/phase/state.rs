//! A single live phase instance.
//!
//! A [`State`] is created when the machine enters a phase and dropped when
//! the machine transitions out of it. It owns the phase timer and a
//! private [`SingleShot`] registry, so single-shot labels never leak from
//! one phase (or one repetition of a phase) into the next.

use std::time::Duration;

use tracing::debug;

use crate::clock::SharedClock;
use crate::singleshot::{Shot, SingleShot};
use crate::timer::Timer;

use super::policy::DurationPolicy;

/// One running (or just-stopped) phase.
#[derive(Debug)]
pub struct State {
    name: String,
    policy: DurationPolicy,
    timer: Timer,
    running: bool,
    start_time: Duration,
    end_time: Option<Duration>,
    singleshot: SingleShot,
}

impl State {
    /// Creates the phase and starts its timer immediately.
    ///
    /// A timed phase gets a countdown timer so [`remaining`](Self::remaining)
    /// is available alongside the elapsed duration.
    #[must_use]
    pub fn new(name: impl Into<String>, policy: DurationPolicy, clock: SharedClock) -> Self {
        let mut timer = match policy.limit() {
            Some(limit) => Timer::countdown(clock, limit),
            None => Timer::new(clock),
        };
        timer.start();
        let start_time = timer.started_at().unwrap_or_default();

        Self {
            name: name.into(),
            policy,
            timer,
            running: true,
            start_time,
            end_time: None,
            singleshot: SingleShot::new(),
        }
    }

    /// Phase name, fixed for the lifetime of the instance.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Duration policy resolved when the phase was entered.
    #[must_use]
    pub const fn policy(&self) -> DurationPolicy {
        self.policy
    }

    /// `true` from creation until [`stop`](Self::stop).
    #[must_use]
    pub const fn running(&self) -> bool {
        self.running
    }

    /// Clock reading when the phase started.
    #[must_use]
    pub const fn start_time(&self) -> Duration {
        self.start_time
    }

    /// Clock reading when the phase stopped.
    #[must_use]
    pub const fn end_time(&self) -> Option<Duration> {
        self.end_time
    }

    /// Whether the phase is allowed to end now.
    ///
    /// Always `false` once stopped and always `false` for manual phases,
    /// whose end is signalled from outside. An immediate phase is ready on
    /// its first check.
    #[must_use]
    pub fn status(&self) -> bool {
        if !self.running {
            return false;
        }
        match self.policy {
            DurationPolicy::Manual => false,
            DurationPolicy::Immediate => true,
            DurationPolicy::Timed(limit) => self.timer.since_start() >= limit,
        }
    }

    /// Time since the phase started, frozen after `stop()`.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.timer.since_start()
    }

    /// Time left before a timed phase may end; `None` for manual phases.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.policy.limit().map(|_| self.timer.elapsed())
    }

    /// Stops the phase and returns its final duration.
    ///
    /// Stopping twice is a driver bug, not a data problem: it is logged at
    /// debug level and reports a zero duration.
    pub fn stop(&mut self) -> Duration {
        if !self.running {
            debug!(phase = %self.name, "stop() on a phase that is not running");
            return Duration::ZERO;
        }
        let duration = self.timer.stop().unwrap_or_default();
        self.end_time = self.timer.stopped_at();
        self.running = false;
        duration
    }

    /// Returns `true` the first time `label` is checked in this phase.
    pub fn singleshot(&self, label: &str) -> bool {
        self.singleshot.check(label)
    }

    /// Runs `action` the first time `label` is used in this phase.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `action`; the label stays fired.
    pub fn singleshot_with<F, E>(&self, label: &str, action: F) -> Result<Shot, E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        self.singleshot.run(label, action)
    }
}
