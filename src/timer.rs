//! Stopwatch and countdown timer.
//!
//! A single [`Timer`] answers both "how long has this taken" and, when
//! built with a maximum duration, "how much longer until timeout".

use std::time::Duration;

use crate::clock::SharedClock;

/// Monotonic stopwatch with an optional countdown.
///
/// - `start()` is idempotent: a running timer is never restarted.
/// - `stop()` freezes the elapsed value; it is a no-op on a timer that
///   was never started.
/// - `reset()` clears start and stop so the timer can be reused.
#[derive(Debug, Clone)]
pub struct Timer {
    clock: SharedClock,
    max_duration: Option<Duration>,
    started_at: Option<Duration>,
    stopped_at: Option<Duration>,
}

impl Timer {
    /// Creates a stopwatch that is not yet started.
    #[must_use]
    pub const fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            max_duration: None,
            started_at: None,
            stopped_at: None,
        }
    }

    /// Creates a countdown from `max_duration` to zero.
    #[must_use]
    pub const fn countdown(clock: SharedClock, max_duration: Duration) -> Self {
        Self {
            clock,
            max_duration: Some(max_duration),
            started_at: None,
            stopped_at: None,
        }
    }

    /// Starts the timer unless it is already running.
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(self.clock.now());
            self.stopped_at = None;
        }
    }

    /// Freezes the elapsed time at this instant.
    ///
    /// Returns the time since start, or `None` if the timer was never
    /// started. A second call keeps the first recorded value.
    pub fn stop(&mut self) -> Option<Duration> {
        let started = self.started_at?;
        if self.stopped_at.is_none() {
            self.stopped_at = Some(self.clock.now());
        }
        self.stopped_at.map(|stopped| stopped.saturating_sub(started))
    }

    /// Clears start and stop times.
    pub const fn reset(&mut self) {
        self.started_at = None;
        self.stopped_at = None;
    }

    /// Returns `true` between `start()` and `stop()`.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.started_at.is_some() && self.stopped_at.is_none()
    }

    /// Clock reading at `start()`.
    #[must_use]
    pub const fn started_at(&self) -> Option<Duration> {
        self.started_at
    }

    /// Clock reading at `stop()`.
    #[must_use]
    pub const fn stopped_at(&self) -> Option<Duration> {
        self.stopped_at
    }

    /// Configured countdown length, if any.
    #[must_use]
    pub const fn max_duration(&self) -> Option<Duration> {
        self.max_duration
    }

    /// Raw time since start, frozen after `stop()`. Zero if never started.
    #[must_use]
    pub fn since_start(&self) -> Duration {
        let Some(started) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.stopped_at.unwrap_or_else(|| self.clock.now());
        end.saturating_sub(started)
    }

    /// Elapsed time, or remaining time for a countdown.
    ///
    /// For a countdown of `d` this is `max(0, d - since_start)` and never
    /// goes negative.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let since = self.since_start();
        self.max_duration
            .map_or(since, |max| max.saturating_sub(since))
    }

    /// `true` once a countdown has reached zero. Always `false` for a
    /// plain stopwatch.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.started_at.is_some()
            && self
                .max_duration
                .is_some_and(|max| self.since_start() >= max)
    }
}
