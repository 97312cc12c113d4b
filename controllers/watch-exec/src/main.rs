//! watch-exec
//!
//! Sidecar that runs a fixed command inside a container whenever its watch
//! target changes. The target is exactly one of:
//! - a file (watched through filesystem notifications)
//! - a ConfigMap (watched through the Kubernetes API)
//! - a Secret (watched through the Kubernetes API)
//!
//! The command runs through the `pods/exec` subresource and its output is logged.

mod cli;
mod config;
mod controller;
mod error;
mod watcher;

use anyhow::Context;
use clap::Parser;
use cli::Args;
use config::Settings;
use controller::Controller;
use std::env;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = Settings::resolve(args, |key| env::var(key).ok())?;

    info!("Starting watch-exec for {}", settings.watch);

    // kube is built with rustls; pick the ring provider explicitly.
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    let watch = settings.watch.to_string();
    let controller = Controller::new(settings)
        .await
        .with_context(|| format!("error creating watcher for {watch}"))?;
    controller.run(shutdown_signal()).await?;

    info!("watch-exec stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
