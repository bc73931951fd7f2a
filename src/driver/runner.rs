//! Protocol runner.
//!
//! Builds a [`StateMachine`] from a loaded [`ProtocolConfig`] and drives it
//! with the dual-loop [`Driver`]. The fast loop owns all trial logic: it
//! sets the next phase, raises the phase's trigger flags, polls input,
//! records response times and counts trials. The graphics loop draws the
//! raised flags, flips, and acknowledges the phase it presented.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{MonotonicClock, SharedClock};
use crate::config::schema::{PhaseConfig, ProtocolConfig};
use crate::error::DriverError;
use crate::observability::events::{Event, EventEmitter, StopReason};
use crate::observability::metrics;
use crate::phase::{ParticipantId, SharedSink, StateMachine, Syncer, TracingSink, TransitionResult};

use super::collaborators::{Display, HeadlessDisplay, InputSignal, InputSource, NoInput, PhaseView, ScriptedInput};
use super::{
    Driver, DriverOptions, DriverReport, FastLoop, GraphicsLoop, LoopContext, PhaseTicket,
    SharedMachine, TriggerFlags,
};

/// Single-shot label for per-trial setup in the initial phase.
const TRIAL_START_SHOT: &str = "trial_start";

/// Single-shot label for the first response in a phase.
const RESPONSE_SHOT: &str = "response";

/// Single-shot label for the first frame presented in a phase.
const FIRST_FRAME_SHOT: &str = "first_frame";

/// Overrides applied on top of the protocol file.
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// Number of trials; defaults to `experiment.trials`.
    pub trials: Option<u32>,
    /// Answer manual phases automatically after this delay.
    pub auto_respond: Option<Duration>,
    /// Display refresh rate; defaults to `display.refresh_hz`.
    pub refresh_hz: Option<f64>,
    /// Pause between fast-loop ticks.
    pub fast_interval: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            trials: None,
            auto_respond: None,
            refresh_hz: None,
            fast_interval: super::DEFAULT_FAST_INTERVAL,
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Identifier shared with the event stream.
    pub run_id: Uuid,
    /// Trials whose final phase completed.
    pub trials_completed: u32,
    /// Response time per completed trial, `None` where no response was given.
    pub responses: Vec<Option<Duration>>,
    /// Why the run stopped.
    pub stop_reason: StopReason,
    /// Loop timing.
    pub loops: DriverReport,
}

#[derive(Debug, Default)]
struct Progress {
    trials_completed: AtomicU32,
    responses: Mutex<Vec<Option<Duration>>>,
    stop_reason: Mutex<Option<StopReason>>,
}

impl Progress {
    fn stop(&self, reason: StopReason) {
        self.stop_reason.lock().get_or_insert(reason);
    }
}

/// Runs a protocol with the dual-loop driver.
pub struct ProtocolRunner {
    protocol: Arc<ProtocolConfig>,
    options: RunnerOptions,
    clock: SharedClock,
    events: Arc<EventEmitter>,
    sink: SharedSink,
    input: Option<Box<dyn InputSource>>,
    display: Option<Box<dyn Display>>,
    running: CancellationToken,
}

impl std::fmt::Debug for ProtocolRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRunner")
            .field("experiment", &self.protocol.experiment.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ProtocolRunner {
    /// Creates a runner on the monotonic clock with events discarded.
    #[must_use]
    pub fn new(protocol: Arc<ProtocolConfig>, options: RunnerOptions) -> Self {
        Self {
            protocol,
            options,
            clock: MonotonicClock::shared(),
            events: Arc::new(EventEmitter::noop()),
            sink: Arc::new(TracingSink),
            input: None,
            display: None,
            running: CancellationToken::new(),
        }
    }

    /// Reads time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Writes run events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Sends phase log lines to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Replaces the input chosen from the protocol and options.
    #[must_use]
    pub fn with_input(mut self, input: Box<dyn InputSource>) -> Self {
        self.input = Some(input);
        self
    }

    /// Replaces the headless display.
    #[must_use]
    pub fn with_display(mut self, display: Box<dyn Display>) -> Self {
        self.display = Some(display);
        self
    }

    /// Uses `token` as the running flag.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.running = token;
        self
    }

    /// Token that stops the run when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.running.clone()
    }

    /// Runs until all trials complete, input quits, or the token is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first loop error, including phase errors such as an
    /// aborting barrier watchdog.
    pub fn run(self) -> Result<RunReport, DriverError> {
        let run_id = Uuid::new_v4();
        let protocol = Arc::clone(&self.protocol);
        let trials = self.options.trials.unwrap_or(protocol.experiment.trials);
        let participants = protocol.sync.as_ref().map_or(0, |s| s.participants);

        let machine = self.build_machine();
        let auto_respond = self.options.auto_respond.or_else(|| {
            protocol
                .input
                .as_ref()
                .and_then(|i| i.auto_respond_delay().ok().flatten())
        });
        let input: Box<dyn InputSource> = match (self.input, auto_respond) {
            (Some(input), _) => input,
            (None, Some(delay)) => Box::new(ScriptedInput::new(delay)),
            (None, None) => Box::new(NoInput),
        };
        let display: Box<dyn Display> = match self.display {
            Some(display) => display,
            None => Box::new(HeadlessDisplay::new(
                self.options
                    .refresh_hz
                    .unwrap_or(protocol.display.refresh_hz),
            )?),
        };

        let progress = Arc::new(Progress::default());
        let driver = Driver::new(
            SharedMachine::new(machine),
            Arc::new(TriggerFlags::new(protocol.triggers.iter().cloned())),
            DriverOptions {
                fast_interval: self.options.fast_interval,
            },
        )
        .with_cancellation(self.running.clone());

        info!(
            experiment = %protocol.experiment.name,
            trials,
            %run_id,
            "run started"
        );
        self.events.emit(Event::RunStarted {
            timestamp: Utc::now(),
            run_id,
            experiment: protocol.experiment.name.clone(),
            trials,
        });

        let fast = TrialLoop {
            protocol: Arc::clone(&protocol),
            input,
            events: Arc::clone(&self.events),
            progress: Arc::clone(&progress),
            trials,
            response: None,
            previous_phase: None,
            stall_emitted: false,
            acknowledges: participants >= 2,
        };
        let graphics = FrameLoop {
            display,
            acknowledges: participants >= 1,
        };

        if trials == 0 {
            progress.stop(StopReason::Completed);
            self.running.cancel();
        }
        let result = driver.run(fast, graphics);

        let trials_completed = progress.trials_completed.load(Ordering::SeqCst);
        let stop_reason = if result.is_err() {
            StopReason::Error
        } else {
            progress.stop_reason.lock().unwrap_or(StopReason::Cancelled)
        };
        self.events.emit(Event::RunStopped {
            timestamp: Utc::now(),
            reason: stop_reason,
            trials_completed,
        });

        let loops = result?;
        info!(trials_completed, reason = ?stop_reason, "run stopped");

        let responses = std::mem::take(&mut *progress.responses.lock());
        Ok(RunReport {
            run_id,
            trials_completed,
            responses,
            stop_reason,
            loops,
        })
    }

    fn build_machine(&self) -> StateMachine {
        let protocol = &self.protocol;
        let mut machine = StateMachine::new(
            protocol.duration_table(),
            protocol.experiment.initial.clone(),
            Arc::clone(&self.clock),
        )
        .with_sink(Arc::clone(&self.sink));

        if let Some(sync) = &protocol.sync {
            machine = machine.with_syncer(Arc::new(Syncer::new(sync.participants)));
            // Validated at load; an unparseable timeout means no watchdog
            if let Ok(Some(timeout)) = sync.watchdog_timeout() {
                machine = machine.with_watchdog(timeout, sync.on_stall);
            }
        }
        machine
    }
}

// ============================================================================
// Fast loop
// ============================================================================

struct TrialLoop {
    protocol: Arc<ProtocolConfig>,
    input: Box<dyn InputSource>,
    events: Arc<EventEmitter>,
    progress: Arc<Progress>,
    trials: u32,
    response: Option<Duration>,
    previous_phase: Option<String>,
    stall_emitted: bool,
    acknowledges: bool,
}

impl TrialLoop {
    fn current_trial(&self) -> u32 {
        self.progress.trials_completed.load(Ordering::SeqCst) + 1
    }

    fn on_entered(&mut self, machine: &mut StateMachine, ctx: &LoopContext) {
        let phase = machine.state().to_owned();
        let config = self.protocol.phase(&phase);

        ctx.triggers
            .raise_only(config.map_or(&[][..], |p| p.show.as_slice()));
        let next = config
            .and_then(|p| p.next.clone())
            .unwrap_or_else(|| self.protocol.experiment.initial.clone());
        machine.set_next_state(next);

        if phase == self.protocol.experiment.initial && machine.singleshot(TRIAL_START_SHOT) {
            self.response = None;
            debug!(trial = self.current_trial(), "trial started");
        }

        metrics::set_current_phase(&phase, self.previous_phase.as_deref());
        self.events.emit(Event::PhaseEntered {
            timestamp: Utc::now(),
            trial: self.current_trial(),
            phase: phase.clone(),
            onset_ms: machine.runtime().as_secs_f64() * 1000.0,
        });
        self.previous_phase = Some(phase);
        self.stall_emitted = false;
    }

    fn on_transitioned(&mut self, machine: &StateMachine, ctx: &LoopContext) {
        let Some(done) = machine.last_completed() else {
            return;
        };
        let trial = self.current_trial();
        self.events.emit(Event::PhaseCompleted {
            timestamp: Utc::now(),
            trial,
            phase: done.name.clone(),
            duration_ms: done.duration.as_secs_f64() * 1000.0,
            next: done.next.clone(),
            forced: done.forced,
        });

        if !self
            .protocol
            .phase(&done.name)
            .is_some_and(PhaseConfig::ends_trial)
        {
            return;
        }

        let response = self.response.take();
        self.progress.responses.lock().push(response);
        let completed = self.progress.trials_completed.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_trial();
        self.events.emit(Event::TrialCompleted {
            timestamp: Utc::now(),
            trial: completed,
            response_ms: response.map(|r| r.as_secs_f64() * 1000.0),
        });
        info!(trial = completed, response = ?response, "trial completed");

        if completed >= self.trials {
            self.progress.stop(StopReason::Completed);
            ctx.triggers.clear();
            ctx.running.cancel();
        }
    }

    fn report_stall(&mut self, machine: &StateMachine) {
        if self.stall_emitted || !machine.barrier_stalled() {
            return;
        }
        self.stall_emitted = true;
        let (acknowledged, expected) = machine
            .syncer()
            .map_or((0, 0), |s| (s.acknowledged(machine.state()), s.expected()));
        self.events.emit(Event::BarrierStalled {
            timestamp: Utc::now(),
            phase: machine.state().to_owned(),
            acknowledged,
            expected,
        });
    }

    fn apply_signal(
        &mut self,
        signal: Option<InputSignal>,
        elapsed: Duration,
        machine: &mut StateMachine,
        ctx: &LoopContext,
    ) -> Result<(), DriverError> {
        match signal {
            Some(InputSignal::MoveOn) => {
                let records_response = self
                    .protocol
                    .phase(machine.state())
                    .is_some_and(|p| p.response);
                if records_response && machine.singleshot(RESPONSE_SHOT) {
                    debug!(phase = machine.state(), ?elapsed, "response recorded");
                    self.response = Some(elapsed);
                }
                machine.request_move_on();
            }
            Some(InputSignal::Skip) => {
                if machine.jump()? {
                    self.on_transitioned(machine, ctx);
                }
            }
            Some(InputSignal::Quit) => {
                info!(phase = machine.state(), "quit requested");
                self.progress.stop(StopReason::QuitRequested);
                ctx.running.cancel();
            }
            None => {}
        }
        Ok(())
    }
}

impl FastLoop for TrialLoop {
    fn tick(&mut self, ctx: &LoopContext) -> Result<(), DriverError> {
        let (ticket, elapsed, manual) = {
            let mut machine = ctx.machine.lock();

            match machine.change_state()? {
                TransitionResult::Entered => self.on_entered(&mut machine, ctx),
                TransitionResult::Transitioned => self.on_transitioned(&machine, ctx),
                TransitionResult::NoOp => {}
            }
            if ctx.running.is_cancelled() {
                return Ok(());
            }
            self.report_stall(&machine);

            let Some(state) = machine.current() else {
                return Ok(());
            };
            let ticket = PhaseTicket {
                phase: state.name().to_owned(),
                entry: machine.entry_count(),
            };
            (ticket, state.duration(), state.policy().is_manual())
        };

        // Polled without the lock so a blocking device read cannot stall frames
        let signal = self.input.poll(&PhaseView {
            name: &ticket.phase,
            elapsed,
            manual,
        })?;

        let mut machine = ctx.machine.lock();
        if machine.entry_count() != ticket.entry {
            debug!(phase = %ticket.phase, ?signal, "input for a finished phase dropped");
            return Ok(());
        }
        self.apply_signal(signal, elapsed, &mut machine, ctx)?;

        if self.acknowledges && !ctx.running.is_cancelled() {
            machine.acknowledge(ParticipantId::FAST);
        }
        Ok(())
    }
}

// ============================================================================
// Graphics loop
// ============================================================================

struct FrameLoop {
    display: Box<dyn Display>,
    acknowledges: bool,
}

impl GraphicsLoop for FrameLoop {
    fn tick(&mut self, ctx: &LoopContext) -> Result<(), DriverError> {
        let ticket = ctx.machine.ticket();
        let raised = ctx.triggers.raised();

        self.display.draw(&raised)?;
        self.display.flip()?;

        let Some(ticket) = ticket else {
            return Ok(());
        };
        {
            let machine = ctx.machine.lock();
            if machine.entry_count() == ticket.entry && machine.singleshot(FIRST_FRAME_SHOT) {
                debug!(phase = %ticket.phase, ?raised, "first frame presented");
            }
        }
        if self.acknowledges {
            ctx.machine.acknowledge(ParticipantId::GRAPHICS, &ticket);
        }
        Ok(())
    }
}
