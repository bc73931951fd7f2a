//! Protocol validation
//!
//! Semantic checks on a deserialized [`ProtocolConfig`]. Validation
//! collects ALL issues rather than stopping at the first, so a protocol
//! author sees every problem in one pass.

use std::collections::{HashSet, VecDeque};

use crate::config::loader::ConfigLimits;
use crate::config::schema::ProtocolConfig;
use crate::error::{Severity, ValidationIssue};
use crate::phase::policy::suggest_name;

/// Loops a barrier can count: the fast loop and the graphics loop.
pub const MAX_PARTICIPANTS: usize = 2;

// ============================================================================
// Public API
// ============================================================================

/// Result of protocol validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Protocol validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a protocol and returns every issue found.
    pub fn validate(&mut self, config: &ProtocolConfig, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_experiment(config);
        self.validate_triggers(config);
        self.validate_phases(config);
        self.validate_references(config);
        self.validate_reachability(config);
        self.validate_sync(config);
        self.validate_display(config);
        self.validate_input(config);
        self.validate_limits(config, limits);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Sections
    // ========================================================================

    fn validate_experiment(&mut self, config: &ProtocolConfig) {
        if config.experiment.name.trim().is_empty() {
            self.add_error(
                "experiment.name",
                "Experiment name is required and cannot be empty",
            );
        }
        if config.experiment.trials == 0 {
            self.add_error("experiment.trials", "At least one trial is required");
        }
    }

    fn validate_triggers(&mut self, config: &ProtocolConfig) {
        let mut seen = HashSet::new();
        for (i, name) in config.triggers.iter().enumerate() {
            if name.trim().is_empty() {
                self.add_error(&format!("triggers[{i}]"), "Trigger name cannot be empty");
            } else if !seen.insert(name.as_str()) {
                self.add_warning(
                    &format!("triggers[{i}]"),
                    &format!("Trigger '{name}' is declared more than once"),
                );
            }
        }
    }

    fn validate_phases(&mut self, config: &ProtocolConfig) {
        if config.phases.is_empty() {
            self.add_error("phases", "At least one phase is required");
            return;
        }

        let mut seen = HashSet::new();
        for (i, phase) in config.phases.iter().enumerate() {
            let path = format!("phases[{i}]");
            if phase.name.trim().is_empty() {
                self.add_error(&format!("{path}.name"), "Phase name cannot be empty");
            } else if !seen.insert(phase.name.as_str()) {
                self.add_error(
                    &format!("{path}.name"),
                    &format!("Duplicate phase name '{}'", phase.name),
                );
            }

            if let Err(message) = phase.duration.to_policy() {
                self.add_error(&format!("{path}.duration"), &message);
            }
        }

        if config.phases.iter().all(|p| p.next.is_some()) {
            self.add_warning(
                "phases",
                "No phase omits 'next'; trials never complete and the run only stops on quit",
            );
        }
    }

    fn validate_references(&mut self, config: &ProtocolConfig) {
        let names: Vec<&str> = config.phases.iter().map(|p| p.name.as_str()).collect();
        let triggers: HashSet<&str> = config.triggers.iter().map(String::as_str).collect();

        if !config.phases.is_empty() && !names.contains(&config.experiment.initial.as_str()) {
            let message = unknown_message(
                "phase",
                &config.experiment.initial,
                suggest_name(&config.experiment.initial, names.iter().copied()),
            );
            self.add_error("experiment.initial", &message);
        }

        for (i, phase) in config.phases.iter().enumerate() {
            if let Some(next) = &phase.next {
                if !names.contains(&next.as_str()) {
                    let message =
                        unknown_message("phase", next, suggest_name(next, names.iter().copied()));
                    self.add_error(&format!("phases[{i}].next"), &message);
                }
            }

            for (j, trigger) in phase.show.iter().enumerate() {
                if !triggers.contains(trigger.as_str()) {
                    let message = unknown_message(
                        "trigger",
                        trigger,
                        suggest_name(trigger, triggers.iter().copied()),
                    );
                    self.add_error(&format!("phases[{i}].show[{j}]"), &message);
                }
            }
        }
    }

    /// Warns about phases no trial can ever enter.
    fn validate_reachability(&mut self, config: &ProtocolConfig) {
        let Some(start) = config.phase(&config.experiment.initial) else {
            return;
        };

        let mut reached = HashSet::from([start.name.as_str()]);
        let mut queue = VecDeque::from([start]);
        while let Some(phase) = queue.pop_front() {
            if let Some(next) = phase.next.as_deref().and_then(|n| config.phase(n)) {
                if reached.insert(next.name.as_str()) {
                    queue.push_back(next);
                }
            }
        }

        for (i, phase) in config.phases.iter().enumerate() {
            if !reached.contains(phase.name.as_str()) {
                self.add_warning(
                    &format!("phases[{i}]"),
                    &format!(
                        "Phase '{}' is not reachable from '{}'",
                        phase.name, config.experiment.initial
                    ),
                );
            }
        }
    }

    fn validate_sync(&mut self, config: &ProtocolConfig) {
        let Some(sync) = &config.sync else {
            return;
        };

        if sync.participants == 0 {
            self.add_error("sync.participants", "Barrier needs at least one participant");
        } else if sync.participants > MAX_PARTICIPANTS {
            self.add_error(
                "sync.participants",
                &format!(
                    "Barrier expects {} participants but only {MAX_PARTICIPANTS} loops acknowledge; \
                     every phase would stall",
                    sync.participants
                ),
            );
        }

        if let Err(message) = sync.watchdog_timeout() {
            self.add_error("sync.watchdog", &message);
        }
    }

    fn validate_display(&mut self, config: &ProtocolConfig) {
        if let Err(message) = config.display.frame_interval() {
            self.add_error("display.refresh_hz", &message);
        }
    }

    fn validate_input(&mut self, config: &ProtocolConfig) {
        if let Some(input) = &config.input {
            if let Err(message) = input.auto_respond_delay() {
                self.add_error("input.auto_respond", &message);
            }
            return;
        }

        if config.has_manual_phase() {
            self.add_warning(
                "input",
                "Protocol has manual phases but no input source; \
                 they only end on --auto-respond or an operator skip",
            );
        }
    }

    fn validate_limits(&mut self, config: &ProtocolConfig, limits: &ConfigLimits) {
        if config.phases.len() > limits.max_phases {
            self.add_error(
                "phases",
                &format!(
                    "Too many phases: {} (limit: {})",
                    config.phases.len(),
                    limits.max_phases
                ),
            );
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

fn unknown_message(kind: &str, name: &str, suggestion: Option<String>) -> String {
    suggestion.map_or_else(
        || format!("Unknown {kind} '{name}'"),
        |s| format!("Unknown {kind} '{name}' (did you mean '{s}'?)"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ConfigLimits {
        ConfigLimits {
            max_phases: 100,
            max_config_size: 1024 * 1024,
        }
    }

    fn validate(yaml: &str) -> ValidationResult {
        let config: ProtocolConfig = serde_yaml::from_str(yaml).unwrap();
        Validator::new().validate(&config, &limits())
    }

    const VALID: &str = r"
experiment: {name: demo, initial: iti, trials: 2}
triggers: [fixation]
input: {auto_respond: 50ms}
phases:
  - {name: iti, duration: 0.5, next: fixation}
  - {name: fixation, duration: manual, show: [fixation]}
";

    #[test]
    fn test_valid_protocol() {
        let result = validate(VALID);
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_empty_phases() {
        let result = validate("experiment: {name: x, initial: a}\nphases: []\n");
        assert!(result.errors.iter().any(|e| e.path == "phases"));
    }

    #[test]
    fn test_collects_all_errors() {
        let result = validate(
            r"
experiment: {name: '', initial: fixaton, trials: 0}
phases:
  - {name: fixation, duration: -1, next: nowhere}
  - {name: fixation, duration: manual, show: [probe]}
",
        );
        let paths: Vec<&str> = result.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"experiment.name"));
        assert!(paths.contains(&"experiment.trials"));
        assert!(paths.contains(&"experiment.initial"));
        assert!(paths.contains(&"phases[0].duration"));
        assert!(paths.contains(&"phases[0].next"));
        assert!(paths.contains(&"phases[1].name"));
        assert!(paths.contains(&"phases[1].show[0]"));
    }

    #[test]
    fn test_unknown_initial_suggests() {
        let result = validate(
            "experiment: {name: x, initial: fixaton}\nphases: [{name: fixation, duration: 1}]\n",
        );
        let issue = result
            .errors
            .iter()
            .find(|e| e.path == "experiment.initial")
            .unwrap();
        assert!(issue.message.contains("did you mean 'fixation'"));
    }

    #[test]
    fn test_participants_bounds() {
        for participants in [0, 3] {
            let result = validate(&format!(
                "experiment: {{name: x, initial: a}}\nphases: [{{name: a, duration: 1}}]\n\
                 sync: {{participants: {participants}}}\n"
            ));
            assert!(
                result.errors.iter().any(|e| e.path == "sync.participants"),
                "participants={participants}"
            );
        }
    }

    #[test]
    fn test_invalid_watchdog() {
        let result = validate(
            "experiment: {name: x, initial: a}\nphases: [{name: a, duration: 1}]\n\
             sync: {participants: 2, watchdog: soon}\n",
        );
        assert!(result.errors.iter().any(|e| e.path == "sync.watchdog"));
    }

    #[test]
    fn test_invalid_refresh_rate() {
        let result = validate(
            "experiment: {name: x, initial: a}\nphases: [{name: a, duration: 1}]\n\
             display: {refresh_hz: 0}\n",
        );
        assert!(result.errors.iter().any(|e| e.path == "display.refresh_hz"));
    }

    #[test]
    fn test_manual_without_input_warns() {
        let result = validate(
            "experiment: {name: x, initial: a}\nphases: [{name: a, duration: manual}]\n",
        );
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "input"));
    }

    #[test]
    fn test_unreachable_phase_warns() {
        let result = validate(
            "experiment: {name: x, initial: a}\n\
             phases: [{name: a, duration: 1}, {name: orphan, duration: 1}]\n",
        );
        assert!(result.is_valid());
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.path == "phases[1]" && w.message.contains("orphan"))
        );
    }

    #[test]
    fn test_endless_trial_warns() {
        let result = validate(
            "experiment: {name: x, initial: a}\nphases: [{name: a, duration: 1, next: a}]\n",
        );
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "phases"));
    }

    #[test]
    fn test_duplicate_trigger_warns() {
        let result = validate(
            "experiment: {name: x, initial: a}\ntriggers: [t, t]\n\
             phases: [{name: a, duration: 1}]\n",
        );
        assert!(result.warnings.iter().any(|w| w.path == "triggers[1]"));
    }

    #[test]
    fn test_phase_limit() {
        let config: ProtocolConfig = serde_yaml::from_str(VALID).unwrap();
        let tight = ConfigLimits {
            max_phases: 1,
            max_config_size: 1024,
        };
        let result = Validator::new().validate(&config, &tight);
        assert!(result.errors.iter().any(|e| e.message.contains("Too many phases")));
    }
}
