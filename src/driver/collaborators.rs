//! Collaborators the loops talk to.
//!
//! Devices and displays stay outside the phase engine. The fast loop polls
//! an [`InputSource`] for signals; the graphics loop hands raised triggers
//! to a [`Display`] and blocks in its flip.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::schema::DisplayConfig;
use crate::error::DriverError;

// ============================================================================
// Input
// ============================================================================

/// Signal produced by an input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSignal {
    /// End the current manual phase (e.g. a key press).
    MoveOn,
    /// Operator skip of the current phase.
    Skip,
    /// Stop the run.
    Quit,
}

/// What an input source can see of the live phase.
#[derive(Debug, Clone, Copy)]
pub struct PhaseView<'a> {
    /// Phase name.
    pub name: &'a str,
    /// Time since the phase started.
    pub elapsed: Duration,
    /// `true` if the phase waits for a move-on signal.
    pub manual: bool,
}

/// Source of move-on and quit signals, polled once per fast-loop tick.
pub trait InputSource: Send {
    /// Returns the signal for this tick, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Collaborator`] if the device fails.
    fn poll(&mut self, phase: &PhaseView<'_>) -> Result<Option<InputSignal>, DriverError>;
}

/// Never signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInput;

impl InputSource for NoInput {
    fn poll(&mut self, _phase: &PhaseView<'_>) -> Result<Option<InputSignal>, DriverError> {
        Ok(None)
    }
}

/// Answers every manual phase after a fixed delay.
///
/// Stands in for a participant when running a protocol unattended.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedInput {
    delay: Duration,
}

impl ScriptedInput {
    /// Responds `delay` after each manual phase starts.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Configured response delay.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self, phase: &PhaseView<'_>) -> Result<Option<InputSignal>, DriverError> {
        Ok((phase.manual && phase.elapsed >= self.delay).then_some(InputSignal::MoveOn))
    }
}

// ============================================================================
// Display
// ============================================================================

/// Rendering target driven by the graphics loop.
pub trait Display: Send {
    /// Draws the stimuli for the raised trigger flags.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Collaborator`] if drawing fails.
    fn draw(&mut self, raised: &[String]) -> Result<(), DriverError>;

    /// Presents the frame, blocking until the next refresh.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Collaborator`] if the flip fails.
    fn flip(&mut self) -> Result<(), DriverError>;
}

/// Display with no output that paces flips to a refresh rate.
#[derive(Debug)]
pub struct HeadlessDisplay {
    frame: Duration,
    next_flip: Option<Instant>,
    frames: u64,
    last_drawn: Vec<String>,
}

impl HeadlessDisplay {
    /// Creates a display refreshing at `refresh_hz`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Collaborator`] for a rate outside the range
    /// [`DisplayConfig::frame_interval`] accepts.
    pub fn new(refresh_hz: f64) -> Result<Self, DriverError> {
        let frame = DisplayConfig { refresh_hz }
            .frame_interval()
            .map_err(DriverError::Collaborator)?;
        Ok(Self {
            frame,
            next_flip: None,
            frames: 0,
            last_drawn: Vec::new(),
        })
    }

    /// Time between flips.
    #[must_use]
    pub const fn frame_interval(&self) -> Duration {
        self.frame
    }

    /// Frames presented so far.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// Triggers drawn into the most recent frame.
    #[must_use]
    pub fn last_drawn(&self) -> &[String] {
        &self.last_drawn
    }
}

impl Display for HeadlessDisplay {
    fn draw(&mut self, raised: &[String]) -> Result<(), DriverError> {
        raised.clone_into(&mut self.last_drawn);
        Ok(())
    }

    fn flip(&mut self) -> Result<(), DriverError> {
        let now = Instant::now();
        let deadline = self.next_flip.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        // Missed deadlines re-anchor instead of bursting to catch up
        let presented = Instant::now().max(deadline);
        self.next_flip = Some(presented + self.frame);
        self.frames += 1;
        Ok(())
    }
}
