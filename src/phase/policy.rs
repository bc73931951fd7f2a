//! Duration policies and the phase duration table.
//!
//! Every phase name maps to exactly one [`DurationPolicy`]. The table is
//! fixed at construction and changes only through explicit updates.

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;

use crate::error::PhaseError;

/// Maximum Damerau-Levenshtein distance for "did you mean" suggestions.
const SUGGESTION_DISTANCE: usize = 3;

/// Rule governing when a phase is allowed to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationPolicy {
    /// Never auto-advances; only a move-on request or a jump ends it.
    Manual,
    /// May end on the first status check after it starts.
    Immediate,
    /// Ends once the elapsed time reaches the duration.
    Timed(Duration),
}

impl DurationPolicy {
    /// Builds a policy from a duration, folding zero into `Immediate`.
    #[must_use]
    pub const fn from_duration(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Immediate
        } else {
            Self::Timed(duration)
        }
    }

    /// Builds a policy from seconds.
    ///
    /// # Errors
    ///
    /// Returns a message if `secs` is negative, not finite, or too large
    /// for a [`Duration`].
    pub fn from_secs(secs: f64) -> Result<Self, String> {
        Duration::try_from_secs_f64(secs)
            .map(Self::from_duration)
            .map_err(|e| {
                format!("duration must be a non-negative number of seconds (got {secs}): {e}")
            })
    }

    /// Parses `"manual"`, a number of seconds, or a humantime string such
    /// as `"250ms"` or `"1m 30s"`.
    ///
    /// # Errors
    ///
    /// Returns a message describing the accepted forms.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("manual") || s.eq_ignore_ascii_case("false") {
            return Ok(Self::Manual);
        }
        if s.eq_ignore_ascii_case("immediate") {
            return Ok(Self::Immediate);
        }
        if let Ok(secs) = s.parse::<f64>() {
            return Self::from_secs(secs);
        }
        humantime::parse_duration(s)
            .map(Self::from_duration)
            .map_err(|e| {
                format!(
                    "invalid duration '{s}': {e} (expected 'manual', seconds, or e.g. '500ms')"
                )
            })
    }

    /// Returns `true` for [`DurationPolicy::Manual`].
    #[must_use]
    pub const fn is_manual(self) -> bool {
        matches!(self, Self::Manual)
    }

    /// Countdown length for the phase timer, if the phase is timed.
    #[must_use]
    pub const fn limit(self) -> Option<Duration> {
        match self {
            Self::Manual => None,
            Self::Immediate => Some(Duration::ZERO),
            Self::Timed(d) => Some(d),
        }
    }
}

impl fmt::Display for DurationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Immediate => write!(f, "immediate"),
            Self::Timed(d) => write!(f, "{:.3}s", d.as_secs_f64()),
        }
    }
}

/// Ordered mapping from phase name to duration policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurationTable {
    entries: IndexMap<String, DurationPolicy>,
}

impl DurationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one entry, returning the previous policy.
    pub fn insert(&mut self, name: impl Into<String>, policy: DurationPolicy) -> Option<DurationPolicy> {
        self.entries.insert(name.into(), policy)
    }

    /// Merges `overrides` into the table, replacing existing entries.
    pub fn update<I, S>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (S, DurationPolicy)>,
        S: Into<String>,
    {
        for (name, policy) in overrides {
            self.entries.insert(name.into(), policy);
        }
    }

    /// Looks up the policy for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<DurationPolicy> {
        self.entries.get(name).copied()
    }

    /// Resolves the policy for `name`.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::UnknownPhase` with the closest known name when
    /// `name` is absent.
    pub fn resolve(&self, name: &str) -> Result<DurationPolicy, PhaseError> {
        self.get(name).ok_or_else(|| PhaseError::UnknownPhase {
            name: name.to_string(),
            suggestion: self.suggest(name),
        })
    }

    /// Suggests the closest known phase name for typo correction.
    #[must_use]
    pub fn suggest(&self, input: &str) -> Option<String> {
        suggest_name(input, self.entries.keys().map(String::as_str))
    }

    /// `true` if `name` has an entry.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, DurationPolicy)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, DurationPolicy)> for DurationTable {
    fn from_iter<I: IntoIterator<Item = (S, DurationPolicy)>>(iter: I) -> Self {
        let mut table = Self::new();
        table.update(iter);
        table
    }
}

/// Returns the candidate closest to `input` within a small edit distance.
#[must_use]
pub fn suggest_name<'a>(input: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    candidates
        .into_iter()
        .map(|name| (name, strsim::damerau_levenshtein(input, name)))
        .filter(|(_, dist)| *dist <= SUGGESTION_DISTANCE)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_duration_is_immediate() {
        assert_eq!(
            DurationPolicy::from_duration(Duration::ZERO),
            DurationPolicy::Immediate
        );
        assert_eq!(DurationPolicy::from_secs(0.0), Ok(DurationPolicy::Immediate));
    }

    #[test]
    fn test_from_secs_timed() {
        assert_eq!(
            DurationPolicy::from_secs(2.0),
            Ok(DurationPolicy::Timed(Duration::from_secs(2)))
        );
    }

    #[test]
    fn test_from_secs_rejects_negative_and_nan() {
        assert!(DurationPolicy::from_secs(-1.0).is_err());
        assert!(DurationPolicy::from_secs(f64::NAN).is_err());
        assert!(DurationPolicy::from_secs(f64::INFINITY).is_err());
    }

    #[test]
    fn test_from_secs_rejects_overflow() {
        let err = DurationPolicy::from_secs(1.0e300).unwrap_err();
        assert!(err.contains("seconds"), "{err}");
        assert!(DurationPolicy::parse("1e300").is_err());
    }

    #[test]
    fn test_parse_manual() {
        assert_eq!(DurationPolicy::parse("manual"), Ok(DurationPolicy::Manual));
        assert_eq!(DurationPolicy::parse("False"), Ok(DurationPolicy::Manual));
    }

    #[test]
    fn test_parse_seconds_and_humantime() {
        assert_eq!(
            DurationPolicy::parse("0.5"),
            Ok(DurationPolicy::Timed(Duration::from_millis(500)))
        );
        assert_eq!(
            DurationPolicy::parse("250ms"),
            Ok(DurationPolicy::Timed(Duration::from_millis(250)))
        );
        assert_eq!(DurationPolicy::parse("0s"), Ok(DurationPolicy::Immediate));
    }

    #[test]
    fn test_parse_invalid() {
        let err = DurationPolicy::parse("soon").unwrap_err();
        assert!(err.contains("soon"));
    }

    #[test]
    fn test_limit() {
        assert_eq!(DurationPolicy::Manual.limit(), None);
        assert_eq!(DurationPolicy::Immediate.limit(), Some(Duration::ZERO));
        assert_eq!(
            DurationPolicy::Timed(Duration::from_secs(3)).limit(),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(DurationPolicy::Manual.to_string(), "manual");
        assert_eq!(
            DurationPolicy::Timed(Duration::from_millis(1500)).to_string(),
            "1.500s"
        );
    }

    #[test]
    fn test_resolve_known_phase() {
        let table: DurationTable = [("iti", DurationPolicy::Immediate)].into_iter().collect();
        assert_eq!(table.resolve("iti"), Ok(DurationPolicy::Immediate));
    }

    #[test]
    fn test_resolve_unknown_phase_suggests() {
        let table: DurationTable = [
            ("fixation", DurationPolicy::Manual),
            ("response", DurationPolicy::Manual),
        ]
        .into_iter()
        .collect();
        let err = table.resolve("fixaton").unwrap_err();
        assert_eq!(
            err,
            PhaseError::UnknownPhase {
                name: "fixaton".to_string(),
                suggestion: Some("fixation".to_string()),
            }
        );
    }

    #[test]
    fn test_resolve_unknown_phase_no_close_match() {
        let table: DurationTable = [("fixation", DurationPolicy::Manual)].into_iter().collect();
        let err = table.resolve("quit").unwrap_err();
        assert!(matches!(err, PhaseError::UnknownPhase { suggestion: None, .. }));
    }

    #[test]
    fn test_update_overrides_and_adds() {
        let mut table: DurationTable = [("probe", DurationPolicy::Manual)].into_iter().collect();
        table.update([
            ("probe", DurationPolicy::Timed(Duration::from_millis(200))),
            ("last", DurationPolicy::Immediate),
        ]);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get("probe"),
            Some(DurationPolicy::Timed(Duration::from_millis(200)))
        );
        assert!(table.contains("last"));
    }

    #[test]
    fn test_iter_preserves_order() {
        let table: DurationTable = [
            ("c", DurationPolicy::Manual),
            ("a", DurationPolicy::Immediate),
            ("b", DurationPolicy::Manual),
        ]
        .into_iter()
        .collect();
        let names: Vec<&str> = table.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }
}
