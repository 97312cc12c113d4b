//! Mock CommandRunner for unit testing
//!
//! Records how often it was run and replays a configured outcome, so watchers
//! can be tested without a cluster.

use crate::error::ExecError;
use crate::runner::ExecOutput;
use crate::runner_trait::CommandRunner;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct MockState {
    calls: AtomicUsize,
    stdout: Mutex<String>,
    stderr: Mutex<String>,
    failure: Mutex<Option<String>>,
    ran: Notify,
}

/// Mock CommandRunner for testing
///
/// Clones share the same call counter and configured outcome.
#[derive(Clone, Default)]
pub struct MockCommandRunner {
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockCommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCommandRunner")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl MockCommandRunner {
    /// Create a mock that succeeds with empty output
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that succeeds with the given output
    pub fn with_output(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        let mock = Self::new();
        *mock.state.stdout.lock().unwrap() = stdout.into();
        *mock.state.stderr.lock().unwrap() = stderr.into();
        mock
    }

    /// Make every subsequent run fail with `message`
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.state.failure.lock().unwrap() = Some(message.into());
    }

    /// Number of completed runs
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` runs completed, giving up after `timeout`.
    ///
    /// Returns whether the count was reached.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            while self.calls() < count {
                self.state.ran.notified().await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait::async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self) -> ExecOutput {
        let output = ExecOutput {
            stdout: self.state.stdout.lock().unwrap().clone(),
            stderr: self.state.stderr.lock().unwrap().clone(),
            error: self
                .state
                .failure
                .lock()
                .unwrap()
                .clone()
                .map(ExecError::Failure),
        };

        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.ran.notify_one();
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_counts_runs() {
        let mock = MockCommandRunner::with_output("out", "");
        let output = mock.run().await;

        assert_eq!(output.stdout, "out");
        assert!(output.error.is_none());
        assert_eq!(mock.calls(), 1);
        assert!(mock.wait_for_calls(1, Duration::from_millis(10)).await);
        assert!(!mock.wait_for_calls(2, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let mock = MockCommandRunner::new();
        mock.fail_with("exit 1");

        let output = mock.clone().run().await;
        assert!(matches!(output.error, Some(ExecError::Failure(ref m)) if m == "exit 1"));
        assert_eq!(mock.calls(), 1);
    }
}
