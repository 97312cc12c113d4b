//! Main controller implementation.
//!
//! This module contains the `Controller` struct that owns the process
//! lifetime: it builds the Kubernetes client and command runner, starts the
//! one change source selected by configuration, and tears it down once when
//! the shutdown signal arrives.

use crate::config::{Settings, WatchTarget};
use crate::error::ControllerError;
use crate::watcher::{ChangeSource, ConfigMapWatcher, FileWatcher, SecretWatcher};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use pod_exec::{CommandRunner, PodCommandRunner};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Main controller for watch-exec.
pub struct Controller {
    source: Arc<dyn ChangeSource>,
    cancel: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance and starts watching.
    ///
    /// Fails if the client cannot be built or the change source cannot
    /// subscribe to its target.
    pub async fn new(settings: Settings) -> Result<Self, ControllerError> {
        info!("Initializing watch-exec");

        let client = kube_client(settings.kubeconfig.as_deref(), settings.context.as_deref()).await?;

        let runner = PodCommandRunner::new(client.clone(), settings.exec);
        info!("Command target: {}", runner.target());
        info!("Command: {:?}", runner.target().command);
        let runner: Arc<dyn CommandRunner> = Arc::new(runner);

        let cancel = CancellationToken::new();
        let source = start_source(&settings.watch, client, runner, cancel.child_token()).await?;

        Ok(Self::with_source(source, cancel))
    }

    /// Wraps an already running change source. `cancel` must be the token the
    /// source was started with, or a parent of it.
    pub fn with_source(source: Arc<dyn ChangeSource>, cancel: CancellationToken) -> Self {
        Self { source, cancel }
    }

    /// Runs until `shutdown` completes, then stops the change source.
    ///
    /// In-flight commands are not waited for.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ControllerError>
    where
        F: Future<Output = ()>,
    {
        info!("watch-exec running");

        shutdown.await;
        info!("Received shutdown signal, shutting down");

        self.cancel.cancel();
        self.source.close()
    }
}

async fn start_source(
    target: &WatchTarget,
    client: Client,
    runner: Arc<dyn CommandRunner>,
    cancel: CancellationToken,
) -> Result<Arc<dyn ChangeSource>, ControllerError> {
    debug!("Starting change source for {}", target);

    let source: Arc<dyn ChangeSource> = match target {
        WatchTarget::File(path) => FileWatcher::new(path, runner, cancel)?,
        WatchTarget::ConfigMap(name) => ConfigMapWatcher::new(client, name, runner, cancel).await?,
        WatchTarget::Secret(name) => SecretWatcher::new(client, name, runner, cancel).await?,
    };
    Ok(source)
}

/// Builds the client from an explicit kubeconfig or context, falling back to
/// in-cluster / default configuration.
async fn kube_client(
    kubeconfig: Option<&Path>,
    context: Option<&str>,
) -> Result<Client, ControllerError> {
    if kubeconfig.is_none() && context.is_none() {
        return Ok(Client::try_default().await?);
    }

    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };
    let config = match kubeconfig {
        Some(path) => {
            info!("Using kubeconfig {}", path.display());
            Config::from_custom_kubeconfig(Kubeconfig::read_from(path)?, &options).await?
        }
        None => Config::from_kubeconfig(&options).await?,
    };
    Ok(Client::try_from(config)?)
}
