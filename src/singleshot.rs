//! Fire-at-most-once event registry.
//!
//! A [`SingleShot`] remembers every label it has seen. The first query or
//! invocation for a label is the only one that fires; labels are never
//! re-armed for the lifetime of the registry. Each phase owns a fresh
//! registry, so "once" means "once per phase instance".
//!
//! ```
//! use trialsync::singleshot::{Shot, SingleShot};
//!
//! let shots = SingleShot::new();
//! assert!(shots.check("probe_onset"));
//! assert!(!shots.check("probe_onset"));
//!
//! let mut sent = 0;
//! let first = shots.run("send_marker", || -> Result<(), std::convert::Infallible> {
//!     sent += 1;
//!     Ok(())
//! });
//! assert_eq!(first, Ok(Shot::Fired));
//! assert_eq!(sent, 1);
//! ```

use dashmap::DashMap;
use tracing::trace;

/// Label shared by every unlabeled call.
pub const DEFAULT_LABEL: &str = "default";

/// Outcome of a single-shot invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shot {
    /// This call was the first for its label.
    Fired,
    /// The label had already fired; nothing was executed.
    AlreadyFired,
}

impl Shot {
    /// Returns `true` for [`Shot::Fired`].
    #[must_use]
    pub const fn fired(self) -> bool {
        matches!(self, Self::Fired)
    }
}

/// Registry of labels that have fired.
///
/// Marking a label is a single map insertion, so when two loops race on
/// the same label exactly one of them observes the first insertion.
#[derive(Debug, Default)]
pub struct SingleShot {
    fired: DashMap<String, ()>,
}

impl SingleShot {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once per label.
    pub fn check(&self, label: &str) -> bool {
        if self.fired.contains_key(label) {
            return false;
        }
        let first = self.fired.insert(label.to_owned(), ()).is_none();
        if first {
            trace!(label, "single-shot fired");
        }
        first
    }

    /// [`check`](Self::check) with the `"default"` label.
    pub fn check_default(&self) -> bool {
        self.check(DEFAULT_LABEL)
    }

    /// Runs `action` if `label` has not fired yet.
    ///
    /// The label is consumed before `action` runs: if the action fails,
    /// the error is returned to the caller and the label stays fired.
    ///
    /// # Errors
    ///
    /// Returns whatever error `action` returns.
    pub fn run<F, E>(&self, label: &str, action: F) -> Result<Shot, E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        if !self.check(label) {
            return Ok(Shot::AlreadyFired);
        }
        action()?;
        Ok(Shot::Fired)
    }

    /// Returns whether `label` has fired, without consuming it.
    #[must_use]
    pub fn has_fired(&self, label: &str) -> bool {
        self.fired.contains_key(label)
    }

    /// Number of distinct labels that have fired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fired.len()
    }

    /// `true` if nothing has fired yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}
