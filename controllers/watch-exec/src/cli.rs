//! Command-line flags.

use clap::Parser;
use std::path::PathBuf;

/// Runs a command inside a container every time a file, ConfigMap or Secret changes.
#[derive(Debug, Default, Parser)]
#[command(name = "watch-exec", version, about)]
pub struct Args {
    /// Pod where the command is executed, as namespace/name.
    /// Defaults to this pod (requires POD_NAME and POD_NAMESPACE from the downward API)
    #[arg(long)]
    pub pod: Option<String>,

    /// Container inside the pod. Empty uses the pod's default container
    #[arg(long, default_value = "")]
    pub container: String,

    /// Command to execute inside the pod, split on whitespace
    #[arg(long)]
    pub command: Option<String>,

    /// Path of the file to watch
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// ConfigMap to watch, as namespace/name
    #[arg(long)]
    pub configmap: Option<String>,

    /// Secret to watch, as namespace/name
    #[arg(long)]
    pub secret: Option<String>,

    /// Path to a kubeconfig file. In-cluster or default configuration is used when unset
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,
}
