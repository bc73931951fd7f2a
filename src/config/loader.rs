//! Protocol loader
//!
//! Loading pipeline:
//! 1. Size check against [`ConfigLimits`]
//! 2. YAML parsing
//! 3. Deserialization to [`ProtocolConfig`]
//! 4. Validation
//! 5. Freeze with `Arc`

use std::path::Path;
use std::sync::Arc;

use serde_yaml::Value;

use crate::config::schema::ProtocolConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Limits on protocol size.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum number of phases.
    pub max_phases: usize,

    /// Maximum protocol file size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_phases: env_or("TRIALSYNC_MAX_PHASES", 1000),
            max_config_size: env_or("TRIALSYNC_MAX_CONFIG_SIZE", 1024 * 1024),
        }
    }
}

/// Result of loading a protocol file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated protocol.
    pub config: Arc<ProtocolConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during protocol loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Protocol loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    limits: ConfigLimits,
}

impl ConfigLoader {
    /// Creates a loader with the given limits.
    #[must_use]
    pub const fn new(limits: ConfigLimits) -> Self {
        Self { limits }
    }

    /// Creates a loader with default limits.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Loads, validates, and freezes a protocol file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or too large, the YAML does
    /// not parse, or validation finds errors.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > self.limits.max_config_size {
            return Err(ConfigError::TooLarge {
                size: file_size,
                limit: self.limits.max_config_size,
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        self.load_str(&raw, path)
    }

    /// Loads a protocol from text. `origin` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is too large, does not parse, or fails
    /// validation.
    pub fn load_str(&self, content: &str, origin: &Path) -> Result<LoadResult, ConfigError> {
        if content.len() > self.limits.max_config_size {
            return Err(ConfigError::TooLarge {
                size: content.len(),
                limit: self.limits.max_config_size,
            });
        }

        // Handle UTF-8 BOM
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);

        let root: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: origin.to_path_buf(),
            line: e.location().map(|l| l.line()),
            message: e.to_string(),
        })?;

        if root.is_null() {
            return Err(ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: None,
                message: "Protocol file is empty".to_string(),
            });
        }

        let config: ProtocolConfig =
            serde_yaml::from_value(root).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: None,
                message: format!("Failed to deserialize protocol: {e}"),
            })?;

        let validation = Validator::new().validate(&config, &self.limits);
        if validation.has_errors() {
            return Err(ConfigError::ValidationError {
                path: origin.display().to_string(),
                errors: validation.errors,
            });
        }

        let warnings = validation
            .warnings
            .into_iter()
            .map(|issue| LoadWarning {
                message: issue.message,
                location: Some(issue.path),
            })
            .collect();

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
