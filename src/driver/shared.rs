//! State machine shared between loops.
//!
//! Both loops reach the machine through a [`SharedMachine`], a mutex
//! around the [`StateMachine`]. Lock order: take the machine lock first,
//! then touch trigger flags. Flags are atomics and never hold a lock, so
//! writing them under the machine lock cannot deadlock; it only keeps a
//! phase change and its flag update together for any reader that also
//! takes the lock.
//!
//! A loop that does its per-phase work outside the lock (the graphics
//! loop draws and flips unlocked) takes a [`PhaseTicket`] first and
//! acknowledges with it afterwards. If the phase changed in between, the
//! acknowledgement is dropped instead of being credited to a phase the
//! loop never processed.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::PhaseError;
use crate::phase::{ParticipantId, StateMachine, TransitionResult};

/// Identifies one phase instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTicket {
    /// Phase name.
    pub phase: String,
    /// Entry counter at the time the ticket was taken.
    pub entry: u64,
}

/// Cloneable handle to a machine behind a mutex.
#[derive(Debug, Clone)]
pub struct SharedMachine {
    inner: Arc<Mutex<StateMachine>>,
}

impl SharedMachine {
    /// Wraps a machine.
    #[must_use]
    pub fn new(machine: StateMachine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(machine)),
        }
    }

    /// Locks the machine for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, StateMachine> {
        self.inner.lock()
    }

    /// [`StateMachine::change_state`] under the lock.
    ///
    /// # Errors
    ///
    /// See [`StateMachine::change_state`].
    pub fn change_state(&self) -> Result<TransitionResult, PhaseError> {
        self.inner.lock().change_state()
    }

    /// [`StateMachine::request_move_on`] under the lock.
    pub fn request_move_on(&self) {
        self.inner.lock().request_move_on();
    }

    /// [`StateMachine::jump`] under the lock.
    ///
    /// # Errors
    ///
    /// See [`StateMachine::jump`].
    pub fn jump(&self) -> Result<bool, PhaseError> {
        self.inner.lock().jump()
    }

    /// Current phase label.
    #[must_use]
    pub fn state(&self) -> String {
        self.inner.lock().state().to_owned()
    }

    /// Ticket for the live phase, or `None` between phases.
    #[must_use]
    pub fn ticket(&self) -> Option<PhaseTicket> {
        let machine = self.inner.lock();
        machine.current().map(|state| PhaseTicket {
            phase: state.name().to_owned(),
            entry: machine.entry_count(),
        })
    }

    /// Acknowledges the phase named by `ticket` if it is still live.
    ///
    /// Returns `true` if a new acknowledgement was recorded.
    pub fn acknowledge(&self, participant: impl Into<ParticipantId>, ticket: &PhaseTicket) -> bool {
        let machine = self.inner.lock();
        let still_live = machine.entry_count() == ticket.entry
            && machine.current().is_some_and(|s| s.name() == ticket.phase);
        still_live && machine.acknowledge(participant)
    }
}
