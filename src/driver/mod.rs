//! Dual-loop driver
//!
//! Runs two loops against one [`SharedMachine`]:
//!
//! - the **fast loop** on its own thread (`"fast"`), ticking as often as
//!   the poll interval allows; it is the only writer of trigger flags
//! - the **graphics loop** on the calling thread, paced by its display's
//!   blocking flip
//!
//! Both poll a shared [`CancellationToken`] at the top of every tick and
//! exit cooperatively. A loop that fails or panics cancels the token so
//! the other one stops too. The fast thread is joined after the graphics
//! loop returns.

pub mod collaborators;
pub mod runner;
pub mod shared;
pub mod triggers;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::DriverError;
use crate::observability::metrics;

pub use collaborators::{Display, HeadlessDisplay, InputSignal, InputSource, NoInput, PhaseView, ScriptedInput};
pub use runner::{ProtocolRunner, RunReport, RunnerOptions};
pub use shared::{PhaseTicket, SharedMachine};
pub use triggers::TriggerFlags;

/// Default pause between fast-loop ticks.
pub const DEFAULT_FAST_INTERVAL: Duration = Duration::from_millis(1);

// ============================================================================
// Loop bodies
// ============================================================================

/// What every loop tick can reach.
#[derive(Debug, Clone)]
pub struct LoopContext {
    /// The shared state machine.
    pub machine: SharedMachine,
    /// Trigger flags, written by the fast loop only.
    pub triggers: Arc<TriggerFlags>,
    /// Cancelled when either loop should stop.
    pub running: CancellationToken,
}

/// One iteration of the fast loop.
pub trait FastLoop: Send {
    /// Runs one tick.
    ///
    /// # Errors
    ///
    /// Any error stops both loops and is returned from [`Driver::run`].
    fn tick(&mut self, ctx: &LoopContext) -> Result<(), DriverError>;
}

/// One iteration of the graphics loop.
pub trait GraphicsLoop {
    /// Runs one tick, including the blocking flip.
    ///
    /// # Errors
    ///
    /// Any error stops both loops and is returned from [`Driver::run`].
    fn tick(&mut self, ctx: &LoopContext) -> Result<(), DriverError>;
}

impl<F> FastLoop for F
where
    F: FnMut(&LoopContext) -> Result<(), DriverError> + Send,
{
    fn tick(&mut self, ctx: &LoopContext) -> Result<(), DriverError> {
        self(ctx)
    }
}

/// Adapter so a closure can serve as the graphics loop.
pub struct GraphicsFn<F>(pub F);

impl<F> GraphicsLoop for GraphicsFn<F>
where
    F: FnMut(&LoopContext) -> Result<(), DriverError>,
{
    fn tick(&mut self, ctx: &LoopContext) -> Result<(), DriverError> {
        (self.0)(ctx)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Tick timing for one loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Completed ticks.
    pub ticks: u64,
    /// Sum of tick work times.
    pub total: Duration,
    /// Longest tick.
    pub max: Duration,
}

impl LoopStats {
    /// Adds one tick.
    pub fn record(&mut self, took: Duration) {
        self.ticks += 1;
        self.total += took;
        self.max = self.max.max(took);
    }

    /// Mean tick time; zero before the first tick.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> Duration {
        if self.ticks == 0 {
            return Duration::ZERO;
        }
        self.total.div_f64(self.ticks as f64)
    }
}

/// Per-loop statistics from one [`Driver::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverReport {
    /// Fast loop.
    pub fast: LoopStats,
    /// Graphics loop.
    pub graphics: LoopStats,
}

// ============================================================================
// Driver
// ============================================================================

/// Driver settings.
#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    /// Pause after each fast-loop tick; zero only yields the thread.
    pub fast_interval: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            fast_interval: DEFAULT_FAST_INTERVAL,
        }
    }
}

/// Runs the fast and graphics loops until cancelled.
#[derive(Debug)]
pub struct Driver {
    ctx: LoopContext,
    options: DriverOptions,
}

impl Driver {
    /// Creates a driver with a fresh running token.
    #[must_use]
    pub fn new(machine: SharedMachine, triggers: Arc<TriggerFlags>, options: DriverOptions) -> Self {
        Self {
            ctx: LoopContext {
                machine,
                triggers,
                running: CancellationToken::new(),
            },
            options,
        }
    }

    /// Uses `token` as the running flag, so outside code can stop the run.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.running = token;
        self
    }

    /// Context handed to every tick.
    #[must_use]
    pub const fn context(&self) -> &LoopContext {
        &self.ctx
    }

    /// Runs both loops to completion.
    ///
    /// The fast loop is moved to a thread named `"fast"`; the graphics
    /// loop runs here. Returns once both have exited.
    ///
    /// # Errors
    ///
    /// Returns the first loop error, [`DriverError::LoopPanicked`] if the
    /// fast thread panicked, or [`DriverError::Spawn`].
    pub fn run<F, G>(&self, fast: F, mut graphics: G) -> Result<DriverReport, DriverError>
    where
        F: FastLoop + 'static,
        G: GraphicsLoop,
    {
        let fast_ctx = self.ctx.clone();
        let interval = self.options.fast_interval;
        let mut fast = fast;
        let handle = thread::Builder::new()
            .name("fast".to_owned())
            .spawn(move || {
                run_loop("fast", &fast_ctx, |ctx| fast.tick(ctx), || pause(interval))
            })
            .map_err(DriverError::Spawn)?;

        let graphics_result = run_loop("graphics", &self.ctx, |ctx| graphics.tick(ctx), || {});

        let fast_result = handle.join().map_err(|_| DriverError::LoopPanicked {
            name: "fast".to_owned(),
        })?;

        Ok(DriverReport {
            fast: fast_result?,
            graphics: graphics_result?,
        })
    }
}

fn pause(interval: Duration) {
    if interval.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(interval);
    }
}

fn run_loop<B, P>(
    name: &'static str,
    ctx: &LoopContext,
    mut body: B,
    mut pace: P,
) -> Result<LoopStats, DriverError>
where
    B: FnMut(&LoopContext) -> Result<(), DriverError>,
    P: FnMut(),
{
    // Cancels on every exit path, unwinding included
    let _stop_other = ctx.running.clone().drop_guard();
    let mut stats = LoopStats::default();

    while !ctx.running.is_cancelled() {
        let started = Instant::now();
        body(ctx)?;
        let took = started.elapsed();
        stats.record(took);
        metrics::record_loop_tick(name, took);
        pace();
    }

    debug!(
        loop_name = name,
        ticks = stats.ticks,
        mean_ms = stats.mean().as_secs_f64() * 1000.0,
        max_ms = stats.max.as_secs_f64() * 1000.0,
        "loop exited"
    );
    Ok(stats)
}
