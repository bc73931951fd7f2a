//! Shared integration-test helpers: fixtures, a stepped clock, and a
//! wrapper for spawning the `trialsync` binary.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::Arc;

use trialsync::clock::{ManualClock, SharedClock};
use trialsync::config::{ConfigLoader, ProtocolConfig};
use trialsync::phase::{DurationPolicy, DurationTable};

/// Returns the path to a test fixture.
#[must_use]
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Loads and validates a fixture protocol.
#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn load_fixture(name: &str) -> Arc<ProtocolConfig> {
    ConfigLoader::with_defaults()
        .load(&fixture_path(name))
        .expect("fixture should load")
        .config
}

/// Runs the binary to completion with `args`.
#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn spawn_command(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_trialsync"))
        .args(args)
        .env_remove("TRIALSYNC_LOG_LEVEL")
        .env_remove("TRIALSYNC_CONFIG")
        .env_remove("TRIALSYNC_EVENTS_FILE")
        .env_remove("TRIALSYNC_METRICS_PORT")
        .output()
        .expect("failed to spawn trialsync")
}

/// A stepped clock plus the same clock as a trait object.
#[must_use]
pub fn manual_clock() -> (Arc<ManualClock>, SharedClock) {
    let clock = Arc::new(ManualClock::new());
    let shared: SharedClock = clock.clone();
    (clock, shared)
}

/// Builds a duration table from pairs.
#[must_use]
pub fn table(entries: &[(&str, DurationPolicy)]) -> DurationTable {
    entries.iter().map(|(n, p)| (*n, *p)).collect()
}
