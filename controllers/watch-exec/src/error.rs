//! Controller-specific error types.
//!
//! This module defines the errors that stop watch-exec from starting or that
//! surface while a watcher shuts down. Failures of the reaction command itself
//! are [`pod_exec::ExecError`] and never end up here.

use thiserror::Error;
use kube::Error as KubeError;

/// Errors that can occur in the watch-exec controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Kubeconfig could not be loaded
    #[error("Kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::KubeconfigError),

    /// Filesystem notification error
    #[error("File watch error: {0}")]
    Notify(#[from] notify::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
