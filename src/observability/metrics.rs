//! Metrics collection.
//!
//! Prometheus-compatible metrics with typed recording helpers. Every
//! helper is a silent no-op until [`init_metrics`] installs a recorder,
//! so the phase engine can record unconditionally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::TrialSyncError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Maximum length for phase name labels.
const MAX_PHASE_LABEL_LEN: usize = 64;

/// Initializes the global metrics recorder.
///
/// With `Some(port)` a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`; with `None` metrics are only recorded in-process.
///
/// # Errors
///
/// Returns `TrialSyncError::Io` if the recorder or listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), TrialSyncError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| TrialSyncError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "trialsync_phase_transitions_total",
        "Completed phase transitions by phase"
    );
    describe_histogram!(
        "trialsync_phase_duration_seconds",
        "Time each phase ran before it ended"
    );
    describe_histogram!(
        "trialsync_loop_tick_ms",
        "Per-iteration work time of each loop in milliseconds"
    );
    describe_counter!(
        "trialsync_barrier_stalls_total",
        "Phases whose barrier watchdog expired"
    );
    describe_counter!("trialsync_trials_total", "Completed trials");
    describe_gauge!(
        "trialsync_current_phase",
        "Currently active phase (1 = active)"
    );
}

/// Records the end of a phase.
pub fn record_phase_transition(phase: &str) {
    counter!(
        "trialsync_phase_transitions_total",
        "phase" => sanitize_phase_label(phase)
    )
    .increment(1);
}

/// Records how long a phase ran.
pub fn record_phase_duration(phase: &str, duration: Duration) {
    histogram!(
        "trialsync_phase_duration_seconds",
        "phase" => sanitize_phase_label(phase)
    )
    .record(duration.as_secs_f64());
}

/// Records one loop iteration's work time.
pub fn record_loop_tick(loop_name: &'static str, duration: Duration) {
    histogram!("trialsync_loop_tick_ms", "loop" => loop_name)
        .record(duration.as_secs_f64() * 1000.0);
}

/// Records a barrier watchdog expiry.
pub fn record_barrier_stall(phase: &str) {
    counter!(
        "trialsync_barrier_stalls_total",
        "phase" => sanitize_phase_label(phase)
    )
    .increment(1);
}

/// Records a completed trial.
pub fn record_trial() {
    counter!("trialsync_trials_total").increment(1);
}

/// Sets the currently active phase gauge.
///
/// Zeros the previous phase label first so stale labels do not keep
/// reporting `1.0`.
pub fn set_current_phase(phase: &str, previous: Option<&str>) {
    if let Some(prev) = previous {
        gauge!("trialsync_current_phase", "phase" => sanitize_phase_label(prev)).set(0.0);
    }
    gauge!("trialsync_current_phase", "phase" => sanitize_phase_label(phase)).set(1.0);
}

/// Truncates a phase name and replaces characters Prometheus rejects.
fn sanitize_phase_label(name: &str) -> String {
    name.chars()
        .take(MAX_PHASE_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_plain_names() {
        assert_eq!(sanitize_phase_label("fixation_cross"), "fixation_cross");
    }

    #[test]
    fn sanitize_replaces_invalid_chars() {
        assert_eq!(sanitize_phase_label("probe onset!"), "probe_onset_");
    }

    #[test]
    fn sanitize_truncates_long_names() {
        let long = "p".repeat(500);
        assert_eq!(sanitize_phase_label(&long).len(), MAX_PHASE_LABEL_LEN);
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_phase_transition("iti");
        record_phase_duration("iti", Duration::from_millis(500));
        record_loop_tick("fast", Duration::from_micros(80));
        record_barrier_stall("probe");
        record_trial();
        set_current_phase("probe", Some("iti"));
    }
}
