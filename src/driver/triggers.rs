//! Trigger flags read by renderers and devices.
//!
//! The set of flag names is fixed when the protocol is loaded; only the
//! values change. Each value is an atomic, so the graphics loop reads
//! without locking while the fast loop writes. A reader may see a value
//! one tick old, which delays a draw by at most one frame.

use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;

/// Named boolean flags in declaration order.
#[derive(Debug, Default)]
pub struct TriggerFlags {
    flags: IndexMap<String, AtomicBool>,
}

impl TriggerFlags {
    /// Creates all flags lowered.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flags: names
                .into_iter()
                .map(|n| (n.into(), AtomicBool::new(false)))
                .collect(),
        }
    }

    /// Sets one flag. Returns `false` if `name` is not declared.
    pub fn set(&self, name: &str, raised: bool) -> bool {
        self.flags.get(name).is_some_and(|flag| {
            flag.store(raised, Ordering::Release);
            true
        })
    }

    /// Reads one flag; `None` if `name` is not declared.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<bool> {
        self.flags.get(name).map(|f| f.load(Ordering::Acquire))
    }

    /// `true` if `name` is declared and raised.
    #[must_use]
    pub fn is_raised(&self, name: &str) -> bool {
        self.get(name).unwrap_or(false)
    }

    /// Raises exactly the flags in `names` and lowers every other one.
    pub fn raise_only<S: AsRef<str>>(&self, names: &[S]) {
        for (name, flag) in &self.flags {
            let raised = names.iter().any(|n| n.as_ref() == name);
            flag.store(raised, Ordering::Release);
        }
    }

    /// Lowers every flag.
    pub fn clear(&self) {
        for flag in self.flags.values() {
            flag.store(false, Ordering::Release);
        }
    }

    /// Names of raised flags, in declaration order.
    #[must_use]
    pub fn raised(&self) -> Vec<String> {
        self.flags
            .iter()
            .filter(|(_, f)| f.load(Ordering::Acquire))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Declared flag names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.flags.keys().map(String::as_str)
    }

    /// Number of declared flags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// `true` if no flags are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}
