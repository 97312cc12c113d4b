//! Error types for remote command execution.

use thiserror::Error;

/// Errors that can occur while running a command in a container.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The exec stream could not be opened (connectivity, auth, unknown pod or container)
    #[error("failed to open exec stream: {0}")]
    Connect(#[from] kube::Error),

    /// Reading the command output failed part way through
    #[error("failed to read command output: {0}")]
    Stream(#[from] std::io::Error),

    /// The remote process exited with a non-zero code
    #[error("command exited with code {}: {message}", .code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    NonZeroExit {
        /// Exit code reported by the kubelet, when it could be parsed
        code: Option<i32>,
        /// Message from the exec status
        message: String,
    },

    /// The exec status reported a failure other than a non-zero exit
    #[error("command failed: {0}")]
    Failure(String),

    /// The exec session ended without a usable status
    #[error("exec protocol error: {0}")]
    Protocol(String),
}
