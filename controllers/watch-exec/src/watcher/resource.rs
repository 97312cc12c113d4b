//! Kubernetes object change sources.
//!
//! ConfigMaps and Secrets are watched the same way, so both are served by one
//! generic [`ResourceWatcher`]. The watch is scoped to the single object by a
//! field selector and runs on `kube_runtime`'s watcher, which re-lists and
//! reconnects with backoff when the server drops the stream.

use super::{react, ChangeSource};
use crate::config::NamespacedName;
use crate::error::ControllerError;
use futures::{Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::NamespaceResourceScope;
use kube::api::WatchParams;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::watcher::{self, watcher, Event};
use kube_runtime::WatchStreamExt;
use pod_exec::CommandRunner;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Server-side timeout of the watch opened to validate access at startup.
const WATCH_CHECK_TIMEOUT_SECS: u32 = 1;

/// Watches a single ConfigMap.
pub type ConfigMapWatcher = ResourceWatcher<ConfigMap>;
/// Watches a single Secret.
pub type SecretWatcher = ResourceWatcher<Secret>;

/// Runs the command whenever one namespaced object changes.
pub struct ResourceWatcher<K> {
    label: String,
    runner: Arc<dyn CommandRunner>,
    cancel: CancellationToken,
    closed: AtomicBool,
    _kind: PhantomData<fn() -> K>,
}

impl<K> ResourceWatcher<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    /// Fetches the object, checks that it may be watched, then opens a watch
    /// scoped to it and waits for the initial sync before handing the stream
    /// to a background task.
    ///
    /// Fails when the object cannot be fetched or the watch cannot be
    /// established. The initial sync never triggers the command.
    pub async fn new(
        client: Client,
        target: &NamespacedName,
        runner: Arc<dyn CommandRunner>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, ControllerError> {
        let label = format!("{} {}", K::kind(&()).to_lowercase(), target);
        let api: Api<K> = Api::namespaced(client, &target.namespace);

        let current = api.get(&target.name).await?;
        let selector = field_selector(&current, &target.namespace);
        debug!("Watching {} with field selector {}", label, selector);

        let resource_version = current.resource_version().unwrap_or_else(|| "0".to_string());
        check_watch(&api, &selector, &resource_version, &label).await?;

        let mut stream = watcher(api, watcher::Config::default().fields(&selector))
            .default_backoff()
            .boxed();

        let mut tracker = ChangeTracker::default();
        loop {
            match stream.try_next().await {
                Ok(Some(event)) => {
                    let done = matches!(event, Event::InitDone);
                    tracker.observe(&event);
                    if done {
                        break;
                    }
                }
                Ok(None) => {
                    return Err(ControllerError::Watch(format!(
                        "watch stream for {label} ended during initial sync"
                    )));
                }
                Err(e) => {
                    return Err(ControllerError::Watch(format!(
                        "failed to establish watch on {label}: {e}"
                    )));
                }
            }
        }

        let source = Arc::new(Self::from_parts(label, runner, cancel));
        tokio::spawn(event_loop(stream, tracker, Arc::clone(&source)));

        info!("Watching {}", source.label);
        Ok(source)
    }
}

impl<K> ResourceWatcher<K> {
    fn from_parts(label: String, runner: Arc<dyn CommandRunner>, cancel: CancellationToken) -> Self {
        Self {
            label,
            runner,
            cancel,
            closed: AtomicBool::new(false),
            _kind: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<K: 'static> ChangeSource for ResourceWatcher<K> {
    async fn on_event(&self) {
        react(self.runner.as_ref(), &self.label).await;
    }

    fn close(&self) -> Result<(), ControllerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
            info!("Stopped watching {}", self.label);
        }
        Ok(())
    }
}

/// Opens one short-lived watch so that a refused watch fails startup.
async fn check_watch<K>(
    api: &Api<K>,
    selector: &str,
    resource_version: &str,
    label: &str,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let params = WatchParams::default()
        .fields(selector)
        .timeout(WATCH_CHECK_TIMEOUT_SECS);
    let refused =
        |e: kube::Error| ControllerError::Watch(format!("failed to establish watch on {label}: {e}"));

    let mut events = api.watch(&params, resource_version).await.map_err(refused)?.boxed();
    // A refused watch may also surface as the first item of the stream.
    events.try_next().await.map_err(refused)?;
    Ok(())
}

fn field_selector<K: Resource>(object: &K, namespace: &str) -> String {
    format!(
        "metadata.name={},metadata.namespace={}",
        object.name_any(),
        object.namespace().as_deref().unwrap_or(namespace)
    )
}

/// Why an event loop returned.
#[derive(Debug, PartialEq, Eq)]
enum LoopExit {
    Cancelled,
    StreamEnded,
}

async fn event_loop<K, S>(
    mut stream: S,
    mut tracker: ChangeTracker,
    source: Arc<ResourceWatcher<K>>,
) -> LoopExit
where
    K: Resource + 'static,
    S: Stream<Item = Result<Event<K>, watcher::Error>> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = source.cancel.cancelled() => {
                info!("{} watcher done", source.label);
                return LoopExit::Cancelled;
            }
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    if tracker.observe(&event) {
                        source.on_event().await;
                    }
                }
                // The backoff layer reconnects on the next poll.
                Some(Err(e)) => warn!("Watch error for {}: {}", source.label, e),
                None => {
                    error!("Watch stream for {} ended unexpectedly", source.label);
                    return LoopExit::StreamEnded;
                }
            }
        }
    }
}

/// Decides which watcher events are changes worth reacting to.
///
/// The initial list only records state. After that, modifications and
/// deletions react, while a re-creation (the object appearing again after a
/// delete) does not. A re-list after a lost watch reacts when the object's
/// resourceVersion moved or the object disappeared in the gap.
#[derive(Debug, Default)]
struct ChangeTracker {
    resource_version: Option<String>,
    exists: bool,
    synced: bool,
    seen_in_relist: bool,
}

impl ChangeTracker {
    fn observe<K: Resource>(&mut self, event: &Event<K>) -> bool {
        match event {
            Event::Init => {
                self.seen_in_relist = false;
                false
            }
            Event::InitApply(object) => {
                self.seen_in_relist = true;
                let changed = self.synced && self.exists && !self.is_current(object);
                self.record(object, true);
                changed
            }
            Event::InitDone => {
                let vanished = self.synced && self.exists && !self.seen_in_relist;
                if vanished {
                    self.exists = false;
                }
                self.synced = true;
                vanished
            }
            Event::Apply(object) => {
                let modified = self.exists && !self.is_current(object);
                self.record(object, true);
                modified
            }
            Event::Delete(object) => {
                self.record(object, false);
                true
            }
        }
    }

    fn is_current<K: Resource>(&self, object: &K) -> bool {
        self.resource_version.is_some()
            && object.meta().resource_version == self.resource_version
    }

    fn record<K: Resource>(&mut self, object: &K, exists: bool) {
        self.resource_version = object.meta().resource_version.clone();
        self.exists = exists;
    }
}
