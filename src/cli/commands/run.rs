//! `run` command
//!
//! Loads a protocol and runs it with the dual-loop driver. The loops are
//! blocking, so the runner moves to a blocking task; the signal handler
//! stops it through the shared cancellation token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cli::args::RunArgs;
use crate::config::ConfigLoader;
use crate::driver::{ProtocolRunner, RunReport, RunnerOptions};
use crate::error::{DriverError, TrialSyncError};
use crate::observability::events::EventEmitter;

/// Run a protocol until its trials complete or the process is interrupted.
///
/// # Errors
///
/// Returns a config error if the protocol does not load, an I/O error if
/// the events file cannot be created, or a driver error if a loop fails.
pub async fn run(args: &RunArgs, quiet: bool, cancel: CancellationToken) -> Result<(), TrialSyncError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    tracing::info!(config = %args.config.display(), "loading protocol");
    let loaded = ConfigLoader::with_defaults().load(&args.config)?;
    for warning in &loaded.warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }

    let events = match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stderr(),
    };

    let options = RunnerOptions {
        trials: args.trials,
        auto_respond: args.auto_respond,
        refresh_hz: args.refresh_hz,
        ..RunnerOptions::default()
    };
    let runner = ProtocolRunner::new(loaded.config, options)
        .with_events(Arc::new(events))
        // Child token: the loops cancel their own token on exit, which must
        // not look like a signal to the caller
        .with_cancellation(cancel.child_token());

    let report = tokio::task::spawn_blocking(move || runner.run())
        .await
        .map_err(|_| DriverError::LoopPanicked {
            name: "graphics".to_owned(),
        })??;

    if !quiet {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    let responses: Vec<f64> = report
        .responses
        .iter()
        .flatten()
        .map(|r| r.as_secs_f64() * 1000.0)
        .collect();

    println!(
        "run {}: {} trial(s) completed ({:?})",
        report.run_id, report.trials_completed, report.stop_reason
    );
    if !responses.is_empty() {
        #[allow(clippy::cast_precision_loss)]
        let mean = responses.iter().sum::<f64>() / responses.len() as f64;
        println!(
            "responses: {}/{} trials, mean {mean:.1} ms",
            responses.len(),
            report.responses.len()
        );
    }
    println!(
        "fast loop: {} ticks, mean {:.3} ms, max {:.3} ms",
        report.loops.fast.ticks,
        report.loops.fast.mean().as_secs_f64() * 1000.0,
        report.loops.fast.max.as_secs_f64() * 1000.0
    );
    println!(
        "graphics loop: {} ticks, mean {:.3} ms, max {:.3} ms",
        report.loops.graphics.ticks,
        report.loops.graphics.mean().as_secs_f64() * 1000.0,
        report.loops.graphics.max.as_secs_f64() * 1000.0
    );
}
