//! Trial state machine.
//!
//! The `StateMachine` owns at most one live [`State`] and decides, on every
//! call to [`StateMachine::change_state`], whether that phase may end. Two
//! gates must both be open:
//!
//! - **timing**: a manual phase needs a move-on request; other phases need
//!   their own `status()`
//! - **barrier**: with a [`Syncer`] attached, every participant must have
//!   acknowledged the phase this cycle
//!
//! The driver supplies the following phase through
//! [`set_next_state`](StateMachine::set_next_state) before the current one
//! is allowed to end.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{Level, debug};

use crate::clock::SharedClock;
use crate::error::PhaseError;
use crate::observability::metrics;
use crate::singleshot::Shot;
use crate::timer::Timer;

use super::policy::{DurationPolicy, DurationTable};
use super::sink::{SharedSink, TracingSink};
use super::state::State;
use super::syncer::{ParticipantId, Syncer};

/// Outcome of one [`StateMachine::change_state`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// A new phase was created for `state`.
    Entered,
    /// The current phase ended; `state` now names the next phase.
    Transitioned,
    /// Nothing changed.
    NoOp,
}

/// What the barrier watchdog does once it expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogAction {
    /// Log once and keep waiting.
    #[default]
    Warn,
    /// Fail `change_state()` with [`PhaseError::BarrierTimeout`].
    Abort,
}

#[derive(Debug, Clone, Copy)]
struct Watchdog {
    timeout: Duration,
    action: WatchdogAction,
}

/// Record of the most recent completed phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPhase {
    /// Phase that ended.
    pub name: String,
    /// Onset relative to the machine's start.
    pub onset: Duration,
    /// Time the phase ran.
    pub duration: Duration,
    /// Phase that follows.
    pub next: String,
    /// `true` if the phase was ended by [`StateMachine::jump`].
    pub forced: bool,
}

/// Phase orchestrator.
pub struct StateMachine {
    durations: DurationTable,
    current: Option<State>,
    state: String,
    next_state: Option<String>,
    syncer: Option<Arc<Syncer>>,
    move_on_requested: bool,
    clock: SharedClock,
    runtime: Timer,
    sink: SharedSink,
    watchdog: Option<Watchdog>,
    /// When the timing gate was first seen open while the barrier was closed
    barrier_wait_since: Option<Duration>,
    stall_reported: bool,
    last_completed: Option<CompletedPhase>,
    entries: u64,
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state)
            .field("next_state", &self.next_state)
            .field("current", &self.current)
            .field("move_on_requested", &self.move_on_requested)
            .field("syncer", &self.syncer)
            .finish_non_exhaustive()
    }
}

impl StateMachine {
    /// Creates a machine positioned before `initial`.
    ///
    /// The phase itself is entered by the first `change_state()` call. The
    /// machine's runtime clock, used for onset times, starts now.
    #[must_use]
    pub fn new(durations: DurationTable, initial: impl Into<String>, clock: SharedClock) -> Self {
        let mut runtime = Timer::new(Arc::clone(&clock));
        runtime.start();
        Self {
            durations,
            current: None,
            state: initial.into(),
            next_state: None,
            syncer: None,
            move_on_requested: false,
            clock,
            runtime,
            sink: Arc::new(TracingSink),
            watchdog: None,
            barrier_wait_since: None,
            stall_reported: false,
            last_completed: None,
            entries: 0,
        }
    }

    /// Attaches a completion barrier.
    #[must_use]
    pub fn with_syncer(mut self, syncer: Arc<Syncer>) -> Self {
        self.syncer = Some(syncer);
        self
    }

    /// Replaces the default [`TracingSink`].
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Installs the barrier watchdog.
    ///
    /// Once the timing gate has been open for `timeout` while the barrier
    /// stays closed, one warning is logged for the phase. With
    /// [`WatchdogAction::Abort`] `change_state()` then fails.
    #[must_use]
    pub const fn with_watchdog(mut self, timeout: Duration, action: WatchdogAction) -> Self {
        self.watchdog = Some(Watchdog { timeout, action });
        self
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Advances the machine by one step.
    ///
    /// # Errors
    ///
    /// - [`PhaseError::UnknownPhase`] when entering a phase with no duration
    ///   policy
    /// - [`PhaseError::MissingNextState`] when both gates are open but no
    ///   next phase was set; the phase keeps running
    /// - [`PhaseError::BarrierTimeout`] when an aborting watchdog expires
    pub fn change_state(&mut self) -> Result<TransitionResult, PhaseError> {
        let Some(current) = &self.current else {
            self.enter()?;
            return Ok(TransitionResult::Entered);
        };

        let timing = if current.policy().is_manual() {
            self.move_on_requested
        } else {
            current.running() && current.status()
        };
        if !timing {
            return Ok(TransitionResult::NoOp);
        }

        if !self.barrier_complete() {
            self.watch_barrier()?;
            return Ok(TransitionResult::NoOp);
        }

        self.finish(false)?;
        Ok(TransitionResult::Transitioned)
    }

    /// Ends the current phase regardless of both gates.
    ///
    /// Returns `false` if no phase is active.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::MissingNextState`] if no next phase was set.
    pub fn jump(&mut self) -> Result<bool, PhaseError> {
        if self.current.is_none() {
            return Ok(false);
        }
        self.finish(true)?;
        Ok(true)
    }

    /// Raises the move-on flag for the current manual phase.
    ///
    /// Idempotent. Timed and immediate phases ignore the flag; it is
    /// cleared whenever a phase is entered.
    pub fn request_move_on(&mut self) {
        if self.move_on_requested {
            return;
        }
        self.move_on_requested = true;
        self.sink
            .log(Level::INFO, &format!("move on requested during {}", self.state));
    }

    fn enter(&mut self) -> Result<(), PhaseError> {
        let policy = self.durations.resolve(&self.state)?;
        let state = State::new(self.state.clone(), policy, Arc::clone(&self.clock));
        let onset = self.onset(&state);

        self.move_on_requested = false;
        self.barrier_wait_since = None;
        self.stall_reported = false;
        self.sink.log(
            Level::INFO,
            &format!("{} begins at t={:.3}s", self.state, onset.as_secs_f64()),
        );
        self.current = Some(state);
        self.entries += 1;
        Ok(())
    }

    fn finish(&mut self, forced: bool) -> Result<(), PhaseError> {
        let Some(next) = self.next_state.clone() else {
            return Err(PhaseError::MissingNextState {
                from: self.state.clone(),
            });
        };
        let Some(mut current) = self.current.take() else {
            return Ok(());
        };

        let duration = current.stop();
        let onset = self.onset(&current);
        self.sink.log(
            Level::INFO,
            &format!(
                "{} ends, duration={:.3}s, next={next}",
                self.state,
                duration.as_secs_f64()
            ),
        );
        metrics::record_phase_transition(&self.state);
        metrics::record_phase_duration(&self.state, duration);

        if let Some(syncer) = &self.syncer {
            syncer.reset();
        }

        self.last_completed = Some(CompletedPhase {
            name: std::mem::replace(&mut self.state, next.clone()),
            onset,
            duration,
            next,
            forced,
        });
        self.next_state = None;
        self.barrier_wait_since = None;
        self.stall_reported = false;
        Ok(())
    }

    fn onset(&self, state: &State) -> Duration {
        let epoch = self.runtime.started_at().unwrap_or_default();
        state.start_time().saturating_sub(epoch)
    }

    // ========================================================================
    // Barrier
    // ========================================================================

    fn barrier_complete(&self) -> bool {
        self.syncer
            .as_ref()
            .is_none_or(|syncer| syncer.completed(&self.state))
    }

    fn watch_barrier(&mut self) -> Result<(), PhaseError> {
        let now = self.clock.now();
        let since = *self.barrier_wait_since.get_or_insert(now);
        let Some(watchdog) = self.watchdog else {
            return Ok(());
        };
        let waited = now.saturating_sub(since);
        if waited < watchdog.timeout {
            return Ok(());
        }

        let (acknowledged, expected) = self
            .syncer
            .as_ref()
            .map_or((0, 0), |s| (s.acknowledged(&self.state), s.expected()));

        if !self.stall_reported {
            self.stall_reported = true;
            metrics::record_barrier_stall(&self.state);
            self.sink.log(
                Level::WARN,
                &format!(
                    "{} barrier stalled: {acknowledged}/{expected} participants after {:.3}s",
                    self.state,
                    waited.as_secs_f64()
                ),
            );
        }

        match watchdog.action {
            WatchdogAction::Warn => Ok(()),
            WatchdogAction::Abort => Err(PhaseError::BarrierTimeout {
                phase: self.state.clone(),
                acknowledged,
                expected,
                waited,
            }),
        }
    }

    /// Records `participant`'s acknowledgement of the current phase.
    ///
    /// Returns `false` when no barrier is attached, no phase is active, or
    /// the participant already acknowledged it.
    pub fn acknowledge(&self, participant: impl Into<ParticipantId>) -> bool {
        match (&self.syncer, &self.current) {
            (Some(syncer), Some(_)) => syncer.count(participant, &self.state),
            _ => false,
        }
    }

    /// `true` once the watchdog has reported the current phase as stalled.
    #[must_use]
    pub const fn barrier_stalled(&self) -> bool {
        self.stall_reported
    }

    // ========================================================================
    // Single-shot
    // ========================================================================

    /// [`State::singleshot`] on the current phase; `false` between phases.
    pub fn singleshot(&self, label: &str) -> bool {
        self.current.as_ref().is_some_and(|s| s.singleshot(label))
    }

    /// [`State::singleshot_with`] on the current phase.
    ///
    /// Between phases nothing runs and [`Shot::AlreadyFired`] is returned.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `action`.
    pub fn singleshot_with<F, E>(&self, label: &str, action: F) -> Result<Shot, E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        match &self.current {
            Some(state) => state.singleshot_with(label, action),
            None => Ok(Shot::AlreadyFired),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current phase label.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Sets the phase to enter next time `change_state()` runs.
    ///
    /// Only honoured between phases, so the live phase always matches
    /// `state`. Returns `false` (and changes nothing) while a phase is
    /// active.
    pub fn set_state(&mut self, name: impl Into<String>) -> bool {
        if self.current.is_some() {
            debug!(state = %self.state, "set_state() ignored while a phase is active");
            return false;
        }
        self.state = name.into();
        true
    }

    /// Phase that follows the current one, if the driver has set it.
    #[must_use]
    pub fn next_state(&self) -> Option<&str> {
        self.next_state.as_deref()
    }

    /// Sets the phase that follows the current one.
    pub fn set_next_state(&mut self, name: impl Into<String>) {
        self.next_state = Some(name.into());
    }

    /// Live phase, if any.
    #[must_use]
    pub const fn current(&self) -> Option<&State> {
        self.current.as_ref()
    }

    /// `true` if a move-on was requested since the current phase began.
    #[must_use]
    pub const fn move_on_requested(&self) -> bool {
        self.move_on_requested
    }

    /// Attached barrier, if any.
    #[must_use]
    pub const fn syncer(&self) -> Option<&Arc<Syncer>> {
        self.syncer.as_ref()
    }

    /// Duration table.
    #[must_use]
    pub const fn durations(&self) -> &DurationTable {
        &self.durations
    }

    /// Adds or replaces duration policies.
    ///
    /// The live phase keeps the policy it was entered with; changes apply
    /// from the next entry.
    pub fn update_durations<I, S>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (S, DurationPolicy)>,
        S: Into<String>,
    {
        self.durations.update(overrides);
    }

    /// Most recent completed phase.
    #[must_use]
    pub const fn last_completed(&self) -> Option<&CompletedPhase> {
        self.last_completed.as_ref()
    }

    /// Number of phases entered so far.
    ///
    /// Together with [`state`](Self::state) this identifies one phase
    /// instance, even when the same phase repeats.
    #[must_use]
    pub const fn entry_count(&self) -> u64 {
        self.entries
    }

    /// Time since the machine was created.
    #[must_use]
    pub fn runtime(&self) -> Duration {
        self.runtime.since_start()
    }

    /// Clock the machine reads.
    #[must_use]
    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::phase::sink::MemorySink;

    fn table() -> DurationTable {
        [
            ("A", DurationPolicy::Manual),
            ("B", DurationPolicy::Immediate),
            ("C", DurationPolicy::Timed(Duration::from_secs(2))),
            ("D", DurationPolicy::Immediate),
        ]
        .into_iter()
        .collect()
    }

    fn machine(initial: &str) -> (StateMachine, Arc<ManualClock>, Arc<MemorySink>) {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(MemorySink::new());
        let m = StateMachine::new(table(), initial, clock.clone()).with_sink(sink.clone());
        (m, clock, sink)
    }

    #[test]
    fn test_first_call_enters() {
        let (mut m, _, _) = machine("A");
        assert!(m.current().is_none());
        assert_eq!(m.change_state(), Ok(TransitionResult::Entered));
        assert_eq!(m.current().map(State::name), Some("A"));
        assert_eq!(m.entry_count(), 1);
    }

    #[test]
    fn test_unknown_phase_is_fatal() {
        let (mut m, _, _) = machine("fixaton");
        let err = m.change_state().unwrap_err();
        assert!(matches!(err, PhaseError::UnknownPhase { ref name, .. } if name == "fixaton"));
        assert!(m.current().is_none());
    }

    #[test]
    fn test_manual_needs_move_on() {
        let (mut m, clock, _) = machine("A");
        m.set_next_state("B");
        m.change_state().unwrap();
        for _ in 0..50 {
            clock.advance_secs(10.0);
            assert_eq!(m.change_state(), Ok(TransitionResult::NoOp));
        }
        m.request_move_on();
        assert_eq!(m.change_state(), Ok(TransitionResult::Transitioned));
        assert_eq!(m.state(), "B");
        assert!(m.current().is_none());
    }

    #[test]
    fn test_move_on_ignored_by_timed_phase() {
        let (mut m, clock, _) = machine("C");
        m.set_next_state("D");
        m.change_state().unwrap();
        m.request_move_on();
        assert_eq!(m.change_state(), Ok(TransitionResult::NoOp));
        clock.advance_secs(2.0);
        assert_eq!(m.change_state(), Ok(TransitionResult::Transitioned));
    }

    #[test]
    fn test_move_on_reset_on_entry() {
        let (mut m, _, _) = machine("A");
        m.request_move_on();
        m.set_next_state("A");
        m.change_state().unwrap();
        assert!(!m.move_on_requested());
        assert_eq!(m.change_state(), Ok(TransitionResult::NoOp));
    }

    #[test]
    fn test_request_move_on_logs_once() {
        let (mut m, _, sink) = machine("A");
        m.change_state().unwrap();
        m.request_move_on();
        m.request_move_on();
        m.request_move_on();
        let requested = sink
            .messages()
            .iter()
            .filter(|l| l.contains("move on requested"))
            .count();
        assert_eq!(requested, 1);
    }

    #[test]
    fn test_immediate_transitions_on_second_call() {
        let (mut m, _, _) = machine("B");
        m.set_next_state("C");
        assert_eq!(m.change_state(), Ok(TransitionResult::Entered));
        assert_eq!(m.change_state(), Ok(TransitionResult::Transitioned));
        assert_eq!(m.state(), "C");
    }

    #[test]
    fn test_timed_transitions_exactly_once() {
        let (mut m, clock, _) = machine("C");
        m.set_next_state("D");
        m.change_state().unwrap();
        clock.advance(Duration::from_millis(1999));
        assert_eq!(m.change_state(), Ok(TransitionResult::NoOp));
        clock.advance(Duration::from_millis(1));
        assert_eq!(m.change_state(), Ok(TransitionResult::Transitioned));
        assert_eq!(m.change_state(), Ok(TransitionResult::Entered));
        assert_eq!(m.state(), "D");
    }

    #[test]
    fn test_missing_next_state_keeps_phase() {
        let (mut m, _, _) = machine("B");
        m.change_state().unwrap();
        assert_eq!(
            m.change_state(),
            Err(PhaseError::MissingNextState {
                from: "B".to_string()
            })
        );
        assert!(m.current().is_some_and(State::running));
        m.set_next_state("C");
        assert_eq!(m.change_state(), Ok(TransitionResult::Transitioned));
    }

    #[test]
    fn test_next_state_cleared_after_transition() {
        let (mut m, _, _) = machine("B");
        m.set_next_state("C");
        m.change_state().unwrap();
        m.change_state().unwrap();
        assert_eq!(m.next_state(), None);
    }

    #[test]
    fn test_jump_forces_manual_phase() {
        let (mut m, _, _) = machine("A");
        m.set_next_state("B");
        m.change_state().unwrap();
        assert_eq!(m.jump(), Ok(true));
        assert_eq!(m.state(), "B");
        assert!(m.last_completed().is_some_and(|c| c.forced));
    }

    #[test]
    fn test_jump_without_phase() {
        let (mut m, _, _) = machine("A");
        assert_eq!(m.jump(), Ok(false));
    }

    #[test]
    fn test_entry_and_exit_log_lines() {
        let (mut m, clock, sink) = machine("C");
        clock.advance_secs(1.5);
        m.set_next_state("D");
        m.change_state().unwrap();
        clock.advance_secs(2.25);
        m.change_state().unwrap();
        let messages = sink.messages();
        assert_eq!(messages[0], "C begins at t=1.500s");
        assert_eq!(messages[1], "C ends, duration=2.250s, next=D");
        assert!(sink.lines().iter().all(|l| l.level == Level::INFO));
    }

    #[test]
    fn test_completed_phase_record() {
        let (mut m, clock, _) = machine("C");
        clock.advance_secs(1.0);
        m.set_next_state("D");
        m.change_state().unwrap();
        clock.advance_secs(2.5);
        m.change_state().unwrap();
        let done = m.last_completed().unwrap();
        assert_eq!(done.name, "C");
        assert_eq!(done.onset, Duration::from_secs(1));
        assert_eq!(done.duration, Duration::from_millis(2500));
        assert_eq!(done.next, "D");
        assert!(!done.forced);
    }

    #[test]
    fn test_barrier_blocks_until_all_acknowledge() {
        let (m, clock, _) = machine("C");
        let syncer = Arc::new(Syncer::new(2));
        let mut m = m.with_syncer(syncer.clone());
        m.set_next_state("D");
        m.change_state().unwrap();
        clock.advance_secs(2.0);
        assert!(m.acknowledge(1));
        assert_eq!(m.change_state(), Ok(TransitionResult::NoOp));
        assert!(m.acknowledge(2));
        assert_eq!(m.change_state(), Ok(TransitionResult::Transitioned));
        assert_eq!(syncer.acknowledged("C"), 0);
    }

    #[test]
    fn test_acknowledge_without_phase_or_syncer() {
        let (m, _, _) = machine("C");
        assert!(!m.acknowledge(ParticipantId::FAST));
        let mut m = m.with_syncer(Arc::new(Syncer::new(1)));
        assert!(!m.acknowledge(ParticipantId::FAST));
        m.change_state().unwrap();
        assert!(m.acknowledge(ParticipantId::FAST));
    }

    #[test]
    fn test_watchdog_warns_once() {
        let (m, clock, sink) = machine("B");
        let mut m = m
            .with_syncer(Arc::new(Syncer::new(2)))
            .with_watchdog(Duration::from_secs(1), WatchdogAction::Warn);
        m.set_next_state("C");
        m.change_state().unwrap();
        assert_eq!(m.change_state(), Ok(TransitionResult::NoOp));
        clock.advance_secs(1.0);
        for _ in 0..5 {
            assert_eq!(m.change_state(), Ok(TransitionResult::NoOp));
        }
        assert!(m.barrier_stalled());
        let warnings: Vec<_> = sink
            .lines()
            .into_iter()
            .filter(|l| l.level == Level::WARN)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].message,
            "B barrier stalled: 0/2 participants after 1.000s"
        );
    }

    #[test]
    fn test_watchdog_abort() {
        let (m, clock, _) = machine("B");
        let mut m = m
            .with_syncer(Arc::new(Syncer::new(2)))
            .with_watchdog(Duration::from_millis(500), WatchdogAction::Abort);
        m.set_next_state("C");
        m.change_state().unwrap();
        m.acknowledge(ParticipantId::FAST);
        assert_eq!(m.change_state(), Ok(TransitionResult::NoOp));
        clock.advance_secs(0.5);
        assert_eq!(
            m.change_state(),
            Err(PhaseError::BarrierTimeout {
                phase: "B".to_string(),
                acknowledged: 1,
                expected: 2,
                waited: Duration::from_millis(500),
            })
        );
    }

    #[test]
    fn test_watchdog_resets_for_next_phase() {
        let (m, clock, _) = machine("B");
        let syncer = Arc::new(Syncer::new(1));
        let mut m = m
            .with_syncer(syncer)
            .with_watchdog(Duration::from_secs(1), WatchdogAction::Warn);
        m.set_next_state("D");
        m.change_state().unwrap();
        m.change_state().unwrap();
        clock.advance_secs(1.0);
        m.change_state().unwrap();
        assert!(m.barrier_stalled());
        m.acknowledge(ParticipantId::FAST);
        m.set_next_state("B");
        assert_eq!(m.change_state(), Ok(TransitionResult::Transitioned));
        assert!(!m.barrier_stalled());
    }

    #[test]
    fn test_set_state_only_between_phases() {
        let (mut m, _, _) = machine("A");
        assert!(m.set_state("C"));
        m.change_state().unwrap();
        assert!(!m.set_state("B"));
        assert_eq!(m.state(), "C");
    }

    #[test]
    fn test_update_durations_applies_on_next_entry() {
        let (mut m, clock, _) = machine("C");
        m.set_next_state("C");
        m.change_state().unwrap();
        m.update_durations([("C", DurationPolicy::Timed(Duration::from_secs(5)))]);
        clock.advance_secs(2.0);
        assert_eq!(m.change_state(), Ok(TransitionResult::Transitioned));
        m.change_state().unwrap();
        clock.advance_secs(2.0);
        assert_eq!(m.change_state(), Ok(TransitionResult::NoOp));
        clock.advance_secs(3.0);
        m.set_next_state("D");
        assert_eq!(m.change_state(), Ok(TransitionResult::Transitioned));
    }

    #[test]
    fn test_singleshot_between_phases() {
        let (mut m, _, _) = machine("A");
        assert!(!m.singleshot("x"));
        m.change_state().unwrap();
        assert!(m.singleshot("x"));
        assert!(!m.singleshot("x"));
        assert_eq!(
            m.singleshot_with("y", || Ok::<(), ()>(())),
            Ok(Shot::Fired)
        );
    }
}
