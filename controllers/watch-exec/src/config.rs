//! Runtime configuration.
//!
//! Turns the parsed command line (plus the downward-API environment) into
//! validated [`Settings`]. Nothing here touches the network, so every
//! configuration mistake is reported before a client or watch exists.

use crate::cli::Args;
use crate::error::ControllerError;
use pod_exec::ExecTarget;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Namespace used when a `namespace/name` value omits the namespace.
pub const DEFAULT_NAMESPACE: &str = "default";
/// Downward API variable holding this pod's name.
pub const POD_NAME_ENV: &str = "POD_NAME";
/// Downward API variable holding this pod's namespace.
pub const POD_NAMESPACE_ENV: &str = "POD_NAMESPACE";

/// A namespaced object name written as `namespace/name` or just `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl FromStr for NamespacedName {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ControllerError::InvalidConfig(format!(
                "'{s}' is not a valid object reference, expected namespace/name"
            ))
        };

        match s.split_once('/') {
            None if !s.is_empty() => Ok(Self::new(DEFAULT_NAMESPACE, s)),
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The single source of change notifications for this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    File(PathBuf),
    ConfigMap(NamespacedName),
    Secret(NamespacedName),
}

impl WatchTarget {
    /// Picks the one watch target out of the three mutually exclusive flags.
    pub fn select(
        file: Option<&Path>,
        configmap: Option<&str>,
        secret: Option<&str>,
    ) -> Result<Self, ControllerError> {
        let file = file.filter(|f| !f.as_os_str().is_empty());
        let configmap = configmap.filter(|c| !c.is_empty());
        let secret = secret.filter(|s| !s.is_empty());

        match (file, configmap, secret) {
            (Some(file), None, None) => Ok(Self::File(absolute_file(file)?)),
            (None, Some(configmap), None) => Ok(Self::ConfigMap(configmap.parse()?)),
            (None, None, Some(secret)) => Ok(Self::Secret(secret.parse()?)),
            (None, None, None) => Err(ControllerError::InvalidConfig(
                "Please specify the flag --file, --configmap or --secret".to_string(),
            )),
            _ => Err(ControllerError::InvalidConfig(
                "--file, --configmap and --secret options are mutually exclusive".to_string(),
            )),
        }
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::ConfigMap(name) => write!(f, "configmap {name}"),
            Self::Secret(name) => write!(f, "secret {name}"),
        }
    }
}

fn absolute_file(path: &Path) -> Result<PathBuf, ControllerError> {
    if path.file_name().is_none() {
        return Err(ControllerError::InvalidConfig(format!(
            "--file {} does not name a file",
            path.display()
        )));
    }
    std::path::absolute(path).map_err(|e| {
        ControllerError::InvalidConfig(format!("cannot resolve --file {}: {e}", path.display()))
    })
}

/// Validated settings for one watch-exec process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub watch: WatchTarget,
    pub exec: ExecTarget,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
}

impl Settings {
    /// Resolves settings from parsed flags, reading the downward-API variables
    /// through `env` when `--pod` is absent.
    pub fn resolve<F>(args: Args, env: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let command = split_command(args.command.as_deref())?;
        let pod = resolve_pod(args.pod.as_deref(), env)?;
        let watch = WatchTarget::select(
            args.file.as_deref(),
            args.configmap.as_deref(),
            args.secret.as_deref(),
        )?;

        Ok(Self {
            watch,
            exec: ExecTarget::new(pod.namespace, pod.name, Some(args.container), command),
            kubeconfig: args.kubeconfig,
            context: args.context,
        })
    }
}

fn split_command(command: Option<&str>) -> Result<Vec<String>, ControllerError> {
    let argv: Vec<String> = command
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if argv.is_empty() {
        return Err(ControllerError::InvalidConfig(
            "Please specify --command".to_string(),
        ));
    }
    Ok(argv)
}

fn resolve_pod<F>(pod: Option<&str>, env: F) -> Result<NamespacedName, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(pod) = pod.filter(|p| !p.is_empty()) {
        return pod.parse();
    }

    let required = |key: &str| {
        env(key).filter(|v| !v.is_empty()).ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "You must specify the {key} environment variable when --pod is not set"
            ))
        })
    };
    let name = required(POD_NAME_ENV)?;
    let namespace = required(POD_NAMESPACE_ENV)?;
    Ok(NamespacedName::new(namespace, name))
}
