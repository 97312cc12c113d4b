//! Change sources.
//!
//! A change source watches one external target and runs the configured command
//! whenever that target changes. All variants share [`react`]; they differ only
//! in how they subscribe to changes:
//!
//! - [`FileWatcher`]: filesystem notifications on the file's directory
//! - [`ConfigMapWatcher`] / [`SecretWatcher`]: a Kubernetes watch on one object
//!
//! Every variant runs its event loop on a spawned task that calls
//! [`ChangeSource::on_event`] for each qualifying change and stops when its
//! cancellation token fires.

mod file;
mod resource;

pub use file::FileWatcher;
pub use resource::{ConfigMapWatcher, SecretWatcher};

use crate::error::ControllerError;
use pod_exec::{CommandRunner, ExecOutput};
use tracing::{error, info, warn};

/// A live subscription to one watch target.
#[async_trait::async_trait]
pub trait ChangeSource: Send + Sync {
    /// Reacts to one observed change.
    async fn on_event(&self);

    /// Stops the event loop and releases the subscription.
    ///
    /// Calling it again after the first time does nothing.
    fn close(&self) -> Result<(), ControllerError>;
}

/// Runs the command for a change in `target` and logs the outcome.
///
/// Failures are logged and returned, never retried.
pub async fn react(runner: &dyn CommandRunner, target: &str) -> ExecOutput {
    info!("Change in {} detected. Executing command...", target);

    let output = runner.run().await;
    if let Some(e) = &output.error {
        error!("Command failed for {}: {}", target, e);
    }
    if !output.stdout.is_empty() {
        info!("Command output: {}", output.stdout);
    }
    if !output.stderr.is_empty() {
        warn!("Command error output: {}", output.stderr);
    }

    output
}
