//! CommandRunner trait for mocking
//!
//! Watchers only depend on this trait, so tests can swap the Kubernetes-backed
//! runner for [`MockCommandRunner`](crate::MockCommandRunner).

use crate::runner::ExecOutput;

/// Runs one fixed command and reports what happened.
///
/// The command and its destination are bound when the runner is built; `run`
/// takes no input and may be called any number of times.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Executes the command and waits for it to finish.
    ///
    /// Failures are reported in [`ExecOutput::error`]; whatever output was
    /// captured before the failure is still returned.
    async fn run(&self) -> ExecOutput;
}
