//! Protocol schema types
//!
//! A protocol file describes one experiment: its phases, the trigger
//! flags renderers may read, the optional cross-loop barrier, and display
//! pacing. These types are deserialized from YAML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::phase::{DurationPolicy, DurationTable, WatchdogAction};

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root of a protocol file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Experiment metadata (required)
    pub experiment: ExperimentMetadata,

    /// Trigger flags the renderer may read
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<String>,

    /// Phase definitions, in declaration order
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,

    /// Cross-loop barrier; omitted means single-loop mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncConfig>,

    /// Display pacing
    #[serde(default)]
    pub display: DisplayConfig,

    /// Input source settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputConfig>,
}

/// Experiment metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentMetadata {
    /// Experiment name
    pub name: String,

    /// First phase of every trial
    pub initial: String,

    /// Number of trials to run
    #[serde(default = "default_trials")]
    pub trials: u32,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

const fn default_trials() -> u32 {
    1
}

// ============================================================================
// Phases
// ============================================================================

/// One phase of a trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    /// Phase name, unique within the protocol
    pub name: String,

    /// Duration policy
    pub duration: DurationSpec,

    /// Phase that follows; absent means this phase ends the trial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    /// Trigger flags raised while this phase is current
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub show: Vec<String>,

    /// A move-on signal in this phase records a response time
    #[serde(default)]
    pub response: bool,
}

impl PhaseConfig {
    /// `true` if completing this phase completes a trial.
    #[must_use]
    pub const fn ends_trial(&self) -> bool {
        self.next.is_none()
    }
}

/// Duration as written in YAML.
///
/// - `manual` or `false` → [`DurationPolicy::Manual`]
/// - `0`, `0.0`, `"0s"` → [`DurationPolicy::Immediate`]
/// - positive seconds or a humantime string (`"250ms"`) →
///   [`DurationPolicy::Timed`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationSpec {
    /// `false` means manual; `true` is rejected
    Flag(bool),
    /// Seconds
    Seconds(f64),
    /// `"manual"`, `"immediate"`, or a humantime string
    Text(String),
}

impl DurationSpec {
    /// Converts to a policy.
    ///
    /// # Errors
    ///
    /// Returns a message for `true`, negative or non-finite seconds, and
    /// unparseable strings.
    pub fn to_policy(&self) -> Result<DurationPolicy, String> {
        match self {
            Self::Flag(false) => Ok(DurationPolicy::Manual),
            Self::Flag(true) => Err(
                "'true' is not a duration (use 'manual', seconds, or e.g. '500ms')".to_string(),
            ),
            Self::Seconds(secs) => DurationPolicy::from_secs(*secs),
            Self::Text(text) => DurationPolicy::parse(text),
        }
    }
}

// ============================================================================
// Sync / Display / Input
// ============================================================================

/// Barrier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Loops that must acknowledge each phase (1 or 2)
    #[serde(default = "default_participants")]
    pub participants: usize,

    /// How long the timing gate may stay open with the barrier closed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watchdog: Option<String>,

    /// What the watchdog does when it expires
    #[serde(default)]
    pub on_stall: WatchdogAction,
}

const fn default_participants() -> usize {
    2
}

impl SyncConfig {
    /// Parsed watchdog timeout.
    ///
    /// # Errors
    ///
    /// Returns a message if the timeout is not a humantime duration.
    pub fn watchdog_timeout(&self) -> Result<Option<Duration>, String> {
        self.watchdog
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw.trim())
                    .map_err(|e| format!("invalid watchdog timeout '{raw}': {e}"))
            })
            .transpose()
    }
}

/// Display pacing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayConfig {
    /// Refresh rate the graphics loop flips at
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_hz: default_refresh_hz(),
        }
    }
}

const fn default_refresh_hz() -> f64 {
    60.0
}

/// Highest refresh rate accepted for the graphics loop.
pub const MAX_REFRESH_HZ: f64 = 1000.0;

impl DisplayConfig {
    /// Time between flips.
    ///
    /// # Errors
    ///
    /// Returns a message unless the rate is in `(0, MAX_REFRESH_HZ]` Hz.
    pub fn frame_interval(&self) -> Result<Duration, String> {
        let hz = self.refresh_hz;
        if !(hz > 0.0 && hz <= MAX_REFRESH_HZ) {
            return Err(format!(
                "Refresh rate must be in (0, {MAX_REFRESH_HZ}] Hz (got {hz})"
            ));
        }
        Duration::try_from_secs_f64(hz.recip())
            .map_err(|e| format!("Refresh rate {hz} Hz has no frame interval: {e}"))
    }
}

/// Input source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Answer every manual phase automatically after this delay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_respond: Option<String>,
}

impl InputConfig {
    /// Parsed auto-respond delay.
    ///
    /// # Errors
    ///
    /// Returns a message if the delay is not a humantime duration.
    pub fn auto_respond_delay(&self) -> Result<Option<Duration>, String> {
        self.auto_respond
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw.trim())
                    .map_err(|e| format!("invalid auto_respond delay '{raw}': {e}"))
            })
            .transpose()
    }
}

// ============================================================================
// Lookups
// ============================================================================

impl ProtocolConfig {
    /// Finds a phase by name.
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseConfig> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Builds the duration table, skipping entries whose duration does
    /// not parse. Validated protocols never have such entries.
    #[must_use]
    pub fn duration_table(&self) -> DurationTable {
        self.phases
            .iter()
            .filter_map(|p| p.duration.to_policy().ok().map(|d| (p.name.clone(), d)))
            .collect()
    }

    /// `true` if any phase needs an external signal to end.
    #[must_use]
    pub fn has_manual_phase(&self) -> bool {
        self.phases
            .iter()
            .any(|p| matches!(p.duration.to_policy(), Ok(DurationPolicy::Manual)))
    }
}
