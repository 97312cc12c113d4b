//! Filesystem change source.
//!
//! The watch is placed on the file's directory rather than the file itself so
//! that it survives the file being replaced (editors writing a temp file and
//! renaming it, or kubelet swapping the `..data` symlink of a projected volume).

use super::{react, ChangeSource};
use crate::error::ControllerError;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use pod_exec::CommandRunner;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Entry kubelet's atomic writer points at the current volume contents.
const ATOMIC_WRITER_DATA: &str = "..data";
/// Notifications buffered while a command is running.
const EVENT_BUFFER: usize = 64;

/// Runs the command whenever the directory sees a write or the file is recreated.
pub struct FileWatcher {
    label: String,
    dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    cancel: CancellationToken,
}

impl FileWatcher {
    /// Starts watching `path`.
    ///
    /// Fails when the directory containing `path` cannot be watched, for
    /// example because it does not exist.
    pub fn new(
        path: &Path,
        runner: Arc<dyn CommandRunner>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, ControllerError> {
        let (dir, file_name) = split_path(path)?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The receiver is gone once the watcher has been closed.
            let _ = tx.blocking_send(res);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let source = Arc::new(Self {
            label: format!("file {}", path.display()),
            dir,
            runner,
            watcher: Mutex::new(Some(watcher)),
            cancel,
        });
        tokio::spawn(event_loop(rx, file_name, Arc::clone(&source)));

        info!("Watching {}", source.label);
        Ok(source)
    }
}

#[async_trait::async_trait]
impl ChangeSource for FileWatcher {
    async fn on_event(&self) {
        react(self.runner.as_ref(), &self.label).await;
    }

    fn close(&self) -> Result<(), ControllerError> {
        self.cancel.cancel();

        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut watcher) = watcher else {
            return Ok(());
        };

        let result = match watcher.unwatch(&self.dir) {
            // The kernel drops the watch by itself when the directory goes away.
            Err(e) if matches!(e.kind, notify::ErrorKind::WatchNotFound) => {
                debug!("Watch on {} was already gone", self.dir.display());
                Ok(())
            }
            other => other,
        };
        drop(watcher);

        info!("Stopped watching {}", self.label);
        result.map_err(Into::into)
    }
}

async fn event_loop(
    mut events: mpsc::Receiver<notify::Result<Event>>,
    file_name: OsString,
    source: Arc<FileWatcher>,
) {
    loop {
        tokio::select! {
            biased;
            _ = source.cancel.cancelled() => {
                info!("File watcher done");
                return;
            }
            event = events.recv() => match event {
                Some(Ok(event)) => {
                    if is_relevant(&event, &file_name) {
                        debug!("Relevant file event: {:?}", event);
                        source.on_event().await;
                    }
                }
                Some(Err(e)) => warn!("Error watching {}: {}", source.label, e),
                None => {
                    debug!("Notification channel for {} closed", source.label);
                    return;
                }
            }
        }
    }
}

fn split_path(path: &Path) -> Result<(PathBuf, OsString), ControllerError> {
    let file_name = path.file_name().ok_or_else(|| {
        ControllerError::InvalidConfig(format!("{} does not name a file", path.display()))
    })?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name.to_os_string()))
}

/// Whether `event` should trigger the command.
///
/// Any write in the watched directory counts. Creations and renames into
/// place count only for the file itself and the atomic-writer `..data` entry.
fn is_relevant(event: &Event, file_name: &OsStr) -> bool {
    match event.kind {
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => true,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().any(|path| {
                path.file_name()
                    .is_some_and(|n| n == file_name || n == ATOMIC_WRITER_DATA)
            })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};
    use pod_exec::MockCommandRunner;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);
    const SETTLE: Duration = Duration::from_millis(300);

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    fn append(path: &Path, data: &str) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(data.as_bytes()).unwrap();
    }

    fn start(path: &Path) -> (Arc<FileWatcher>, MockCommandRunner) {
        let runner = MockCommandRunner::with_output("hi", "");
        let watcher = FileWatcher::new(path, Arc::new(runner.clone()), CancellationToken::new()).unwrap();
        (watcher, runner)
    }

    #[test]
    fn test_relevant_events() {
        let name = OsStr::new("app.yaml");

        assert!(is_relevant(&event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), "/etc/app/app.yaml"), name));
        assert!(is_relevant(&event(EventKind::Modify(ModifyKind::Any), "/etc/app/app.yaml"), name));
        assert!(is_relevant(&event(EventKind::Create(CreateKind::File), "/etc/app/app.yaml"), name));
        assert!(is_relevant(&event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), "/etc/app/app.yaml"), name));
        assert!(is_relevant(&event(EventKind::Create(CreateKind::Any), "/etc/app/..data"), name));
        assert!(is_relevant(&event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), "/etc/app/..data"), name));
        // Writes count for every file in the directory.
        assert!(is_relevant(&event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), "/etc/app/other.yaml"), name));
        assert!(is_relevant(&event(EventKind::Modify(ModifyKind::Data(DataChange::Any)), "/etc/app/..data"), name));
    }

    #[test]
    fn test_irrelevant_events() {
        let name = OsStr::new("app.yaml");

        assert!(!is_relevant(&event(EventKind::Create(CreateKind::File), "/etc/app/other.yaml"), name));
        assert!(!is_relevant(&event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), "/etc/app/other.yaml"), name));
        assert!(!is_relevant(&event(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)), "/etc/app/app.yaml"), name));
        assert!(!is_relevant(&event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), "/etc/app/app.yaml"), name));
        assert!(!is_relevant(&event(EventKind::Modify(ModifyKind::Name(RenameMode::Both)), "/etc/app/app.yaml"), name));
        assert!(!is_relevant(&event(EventKind::Access(AccessKind::Any), "/etc/app/app.yaml"), name));
        assert!(!is_relevant(&event(EventKind::Remove(RemoveKind::File), "/etc/app/app.yaml"), name));
    }

    #[test]
    fn test_split_path() {
        let (dir, name) = split_path(Path::new("/etc/app/app.yaml")).unwrap();
        assert_eq!(dir, PathBuf::from("/etc/app"));
        assert_eq!(name, OsString::from("app.yaml"));

        let (dir, name) = split_path(Path::new("app.yaml")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, OsString::from("app.yaml"));

        assert!(split_path(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn test_write_triggers_one_reaction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t");
        fs::write(&path, "initial").unwrap();

        let (watcher, runner) = start(&path);
        append(&path, "dummy");

        assert!(runner.wait_for_calls(1, WAIT).await, "write was not detected");
        tokio::time::sleep(SETTLE).await;
        assert_eq!(runner.calls(), 1);

        watcher.close().unwrap();
    }

    #[tokio::test]
    async fn test_sibling_create_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t");
        fs::write(&path, "initial").unwrap();

        let (watcher, runner) = start(&path);
        fs::File::create(dir.path().join("other")).unwrap();
        append(&path, "dummy");

        assert!(runner.wait_for_calls(1, WAIT).await);
        tokio::time::sleep(SETTLE).await;
        assert_eq!(runner.calls(), 1, "creating a sibling file must not react");

        watcher.close().unwrap();
    }

    #[tokio::test]
    async fn test_sibling_write_triggers_reaction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t");
        let sibling = dir.path().join("other");
        fs::write(&sibling, "initial").unwrap();

        let (watcher, runner) = start(&path);
        append(&sibling, "dummy");

        assert!(runner.wait_for_calls(1, WAIT).await, "sibling write was not detected");
        tokio::time::sleep(SETTLE).await;
        assert_eq!(runner.calls(), 1);

        watcher.close().unwrap();
    }

    #[tokio::test]
    async fn test_recreated_file_triggers_reaction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t");

        let (watcher, runner) = start(&path);
        fs::File::create(&path).unwrap();

        assert!(runner.wait_for_calls(1, WAIT).await, "create was not detected");
        tokio::time::sleep(SETTLE).await;
        assert_eq!(runner.calls(), 1);

        watcher.close().unwrap();
    }

    #[tokio::test]
    async fn test_no_reaction_after_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t");
        fs::write(&path, "initial").unwrap();

        let (watcher, runner) = start(&path);
        append(&path, "one");
        assert!(runner.wait_for_calls(1, WAIT).await);

        watcher.close().unwrap();
        append(&path, "two");
        tokio::time::sleep(SETTLE).await;

        assert_eq!(runner.calls(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (watcher, _runner) = start(&dir.path().join("t"));

        watcher.close().unwrap();
        watcher.close().unwrap();
    }

    #[tokio::test]
    async fn test_on_event_runs_command() {
        let dir = TempDir::new().unwrap();
        let (watcher, runner) = start(&dir.path().join("t"));

        watcher.on_event().await;
        assert_eq!(runner.calls(), 1);

        watcher.close().unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("t");

        let result = FileWatcher::new(&path, Arc::new(MockCommandRunner::new()), CancellationToken::new());
        assert!(matches!(result, Err(ControllerError::Notify(_))));
    }
}
