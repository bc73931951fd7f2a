//! Error types for `trialsync`
//!
//! The hierarchy separates configuration problems (fatal to a trial),
//! phase engine failures, and dual-loop driver failures. Each maps to a
//! process exit code for the CLI.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `trialsync` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Phase engine error (unknown phase, barrier timeout)
    pub const PHASE_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `trialsync` operations.
#[derive(Debug, Error)]
pub enum TrialSyncError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Phase engine error
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// Dual-loop driver error
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TrialSyncError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Phase(_) | Self::Driver(DriverError::Phase(_)) => ExitCode::PHASE_ERROR,
            Self::Driver(_) => ExitCode::ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Protocol file loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the protocol file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Protocol validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the protocol file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced protocol file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Protocol file exceeds the configured size limit
    #[error("protocol file too large: {size} bytes (limit: {limit})")]
    TooLarge {
        /// Actual file size in bytes
        size: usize,
        /// Configured limit in bytes
        limit: usize,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during protocol validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "phases[2].next")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the protocol from being used
    Error,
    /// Potential issue that does not prevent loading
    Warning,
}

// ============================================================================
// Phase Engine Errors
// ============================================================================

/// Phase state machine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PhaseError {
    /// Phase name is absent from the duration table
    #[error("phase '{name}' has no duration policy{}", suggestion_suffix(.suggestion.as_deref()))]
    UnknownPhase {
        /// The phase that could not be resolved
        name: String,
        /// Closest known phase name, if any is similar enough
        suggestion: Option<String>,
    },

    /// Both gates opened but the driver never set a next phase
    #[error("phase '{from}' is ready to end but no next phase was set")]
    MissingNextState {
        /// The phase that was about to end
        from: String,
    },

    /// The barrier watchdog expired with `WatchdogAction::Abort`
    #[error(
        "barrier for phase '{phase}' stalled: {acknowledged}/{expected} participants after {waited:?}"
    )]
    BarrierTimeout {
        /// Phase whose barrier never completed
        phase: String,
        /// Distinct participants that acknowledged
        acknowledged: usize,
        /// Participants the barrier waits for
        expected: usize,
        /// How long the timing gate had been open
        waited: Duration,
    },
}

fn suggestion_suffix(suggestion: Option<&str>) -> String {
    suggestion.map_or_else(String::new, |s| format!(" (did you mean '{s}'?)"))
}

// ============================================================================
// Driver Errors
// ============================================================================

/// Errors raised while running the fast and graphics loops.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The state machine rejected a transition
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// A loop thread panicked
    #[error("{name} loop panicked")]
    LoopPanicked {
        /// Name of the loop
        name: String,
    },

    /// A collaborator (input, display, single-shot action) failed
    #[error("collaborator failed: {0}")]
    Collaborator(String),

    /// The fast loop thread could not be started
    #[error("failed to spawn loop thread: {0}")]
    Spawn(#[source] std::io::Error),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `trialsync` operations.
pub type Result<T> = std::result::Result<T, TrialSyncError>;

// ============================================================================
// Tests
// ============================================================================
