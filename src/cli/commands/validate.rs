//! `validate` command
//!
//! Loads each protocol file, reports every issue, and fails if any file
//! has errors (or warnings, with `--strict`).

use std::path::Path;

use serde_json::json;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::{ConfigLoader, LoadWarning};
use crate::error::{ConfigError, Severity, TrialSyncError, ValidationIssue};

/// Outcome for one file.
struct FileReport {
    errors: Vec<String>,
    warnings: Vec<String>,
    failure: Option<TrialSyncError>,
}

/// Validate protocol files without running them.
///
/// Every file is checked even after a failure; the first failure is
/// returned.
///
/// # Errors
///
/// Returns the first file's load or validation error.
pub fn run(args: &ValidateArgs, quiet: bool) -> Result<(), TrialSyncError> {
    let loader = ConfigLoader::with_defaults();
    let mut first_failure = None;

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating protocol");
        let report = check(&loader, path, args.strict);

        if !quiet {
            print_report(path, &report, args.format);
        }
        if first_failure.is_none() {
            first_failure = report.failure;
        }
    }

    first_failure.map_or(Ok(()), Err)
}

fn check(loader: &ConfigLoader, path: &Path, strict: bool) -> FileReport {
    match loader.load(path) {
        Ok(loaded) => {
            let warnings: Vec<String> = loaded.warnings.iter().map(ToString::to_string).collect();
            let failure = (strict && !loaded.warnings.is_empty()).then(|| {
                TrialSyncError::Config(ConfigError::ValidationError {
                    path: path.display().to_string(),
                    errors: loaded.warnings.iter().map(promote).collect(),
                })
            });
            FileReport {
                errors: Vec::new(),
                warnings,
                failure,
            }
        }
        Err(ConfigError::ValidationError { path: origin, errors }) => FileReport {
            errors: errors
                .iter()
                .filter(|i| i.severity == Severity::Error)
                .map(|i| format!("{} at {}", i.message, i.path))
                .collect(),
            warnings: errors
                .iter()
                .filter(|i| i.severity == Severity::Warning)
                .map(|i| format!("{} at {}", i.message, i.path))
                .collect(),
            failure: Some(TrialSyncError::Config(ConfigError::ValidationError {
                path: origin,
                errors,
            })),
        },
        Err(other) => FileReport {
            errors: vec![other.to_string()],
            warnings: Vec::new(),
            failure: Some(TrialSyncError::Config(other)),
        },
    }
}

fn promote(warning: &LoadWarning) -> ValidationIssue {
    ValidationIssue {
        path: warning.location.clone().unwrap_or_default(),
        message: warning.message.clone(),
        severity: Severity::Error,
    }
}

fn print_report(path: &Path, report: &FileReport, format: OutputFormat) {
    match format {
        OutputFormat::Human => {
            if report.errors.is_empty() {
                println!(
                    "{}: valid ({} warning{})",
                    path.display(),
                    report.warnings.len(),
                    if report.warnings.len() == 1 { "" } else { "s" }
                );
            } else {
                println!("{}: invalid", path.display());
            }
            for error in &report.errors {
                println!("  error: {error}");
            }
            for warning in &report.warnings {
                println!("  warning: {warning}");
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                json!({
                    "file": path.display().to_string(),
                    "valid": report.failure.is_none(),
                    "errors": report.errors,
                    "warnings": report.warnings,
                })
            );
        }
    }
}
