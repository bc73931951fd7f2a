//! Cross-loop completion barrier.
//!
//! A [`Syncer`] decouples "the phase's own timing condition is met" from
//! "every concurrent loop has actually observed and processed the phase".
//! Participants call [`Syncer::count`] after finishing their per-phase
//! work; the state machine only lets a phase end once
//! [`Syncer::completed`] holds, and clears all acknowledgements with
//! [`Syncer::reset`] exactly once per transition.
//!
//! A barrier that expects more participants than will ever acknowledge
//! never completes. The syncer does not detect this itself; see the
//! machine's watchdog.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

use dashmap::DashMap;
use tracing::trace;

/// Identifier of a barrier participant (usually one per loop).
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ParticipantId(Cow<'static, str>);

impl ParticipantId {
    /// The near-real-time control loop.
    pub const FAST: Self = Self(Cow::Borrowed("fast"));

    /// The display-bound rendering loop.
    pub const GRAPHICS: Self = Self(Cow::Borrowed("graphics"));

    /// Creates an identifier from any string.
    #[must_use]
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ParticipantId {
    fn from(s: &'static str) -> Self {
        Self(Cow::Borrowed(s))
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(Cow::Owned(s))
    }
}

impl From<u32> for ParticipantId {
    fn from(n: u32) -> Self {
        Self(Cow::Owned(n.to_string()))
    }
}

/// Multi-participant completion tracker keyed by phase name.
#[derive(Debug)]
pub struct Syncer {
    expected: usize,
    acks: DashMap<String, HashSet<ParticipantId>>,
}

impl Syncer {
    /// Creates a barrier waiting for `expected` distinct participants.
    ///
    /// With `expected == 0` every phase is complete immediately.
    #[must_use]
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            acks: DashMap::new(),
        }
    }

    /// Number of participants a phase waits for.
    #[must_use]
    pub const fn expected(&self) -> usize {
        self.expected
    }

    /// Records that `participant` finished processing `phase` this cycle.
    ///
    /// Idempotent per (participant, phase) pair. Returns `true` if this
    /// call added a new acknowledgement.
    pub fn count(&self, participant: impl Into<ParticipantId>, phase: &str) -> bool {
        let participant = participant.into();
        let mut entry = self.acks.entry(phase.to_owned()).or_default();
        let added = entry.insert(participant.clone());
        if added {
            trace!(
                %participant,
                phase,
                acknowledged = entry.len(),
                expected = self.expected,
                "barrier acknowledgement"
            );
        }
        added
    }

    /// Distinct participants recorded for `phase` this cycle.
    #[must_use]
    pub fn acknowledged(&self, phase: &str) -> usize {
        self.acks.get(phase).map_or(0, |set| set.len())
    }

    /// Whether `participant` has acknowledged `phase` this cycle.
    #[must_use]
    pub fn has_acknowledged(&self, participant: &ParticipantId, phase: &str) -> bool {
        self.acks
            .get(phase)
            .is_some_and(|set| set.contains(participant))
    }

    /// `true` once the expected number of distinct participants have
    /// acknowledged `phase`. Stays `true` until the next `reset()`.
    #[must_use]
    pub fn completed(&self, phase: &str) -> bool {
        self.acknowledged(phase) >= self.expected
    }

    /// Clears every phase's acknowledgements.
    ///
    /// Called by the state machine once per completed transition, never
    /// by participants.
    pub fn reset(&self) {
        self.acks.clear();
    }
}
