//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod run;
pub mod validate;
pub mod version;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands};
use crate::error::TrialSyncError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// `cancel` is cancelled by the signal handler; long-running commands stop
/// when it fires.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), TrialSyncError> {
    match cli.command {
        Commands::Run(args) => run::run(&args, cli.quiet, cancel).await,
        Commands::Validate(args) => validate::run(&args, cli.quiet),
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}
