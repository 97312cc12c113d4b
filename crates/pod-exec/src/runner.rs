//! Kubernetes-backed command runner.
//!
//! Opens a `pods/exec` session without a TTY, streams stdout and stderr back
//! and interprets the status message the kubelet sends when the process exits.

use crate::error::ExecError;
use crate::runner_trait::CommandRunner;
use crate::target::ExecTarget;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams};
use kube::Client;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Reason the kubelet reports when the remote process exited non-zero.
const NON_ZERO_EXIT_REASON: &str = "NonZeroExitCode";
/// Status cause carrying the numeric exit code.
const EXIT_CODE_CAUSE: &str = "ExitCode";

/// Result of a single command run.
#[derive(Debug, Default)]
pub struct ExecOutput {
    /// Trimmed stdout
    pub stdout: String,
    /// Trimmed stderr
    pub stderr: String,
    /// Why the run failed, if it did
    pub error: Option<ExecError>,
}

impl ExecOutput {
    /// Output of a run that failed before producing anything.
    pub fn failed(error: ExecError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Runs a fixed command in a pod through the Kubernetes API.
#[derive(Clone)]
pub struct PodCommandRunner {
    api: Api<Pod>,
    target: ExecTarget,
}

impl std::fmt::Debug for PodCommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodCommandRunner")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl PodCommandRunner {
    /// Creates a runner for `target` using `client`.
    pub fn new(client: Client, target: ExecTarget) -> Self {
        Self {
            api: Api::namespaced(client, &target.namespace),
            target,
        }
    }

    /// The pod, container and command this runner executes.
    pub fn target(&self) -> &ExecTarget {
        &self.target
    }

    fn attach_params(&self) -> AttachParams {
        let params = AttachParams::default()
            .stdin(false)
            .stdout(true)
            .stderr(true)
            .tty(false);
        match &self.target.container {
            Some(container) => params.container(container.clone()),
            None => params,
        }
    }
}

#[async_trait::async_trait]
impl CommandRunner for PodCommandRunner {
    async fn run(&self) -> ExecOutput {
        debug!("Executing {:?} in {}", self.target.command, self.target);

        let mut process = match self
            .api
            .exec(&self.target.pod, self.target.command.clone(), &self.attach_params())
            .await
        {
            Ok(process) => process,
            Err(e) => return ExecOutput::failed(ExecError::Connect(e)),
        };

        let stdout = process.stdout();
        let stderr = process.stderr();
        let status = process.take_status();
        let mut output = capture(stdout, stderr, status).await;

        if let Err(e) = process.join().await {
            if output.error.is_none() {
                output.error = Some(ExecError::Protocol(e.to_string()));
            }
        }

        output
    }
}

/// Reads both output streams to the end while waiting for the exit status.
///
/// A status failure takes precedence over read errors; output read before any
/// failure is kept.
pub(crate) async fn capture<O, E, S>(
    stdout: Option<O>,
    stderr: Option<E>,
    status: Option<S>,
) -> ExecOutput
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    S: Future<Output = Option<Status>>,
{
    let (stdout, stderr, status) = tokio::join!(drain(stdout), drain(stderr), async move {
        match status {
            Some(status) => status.await,
            None => None,
        }
    });

    let (stdout, stdout_err) = stdout;
    let (stderr, stderr_err) = stderr;

    let error = match status {
        Some(status) => status_error(&status),
        None => Some(ExecError::Protocol(
            "exec session closed without reporting an exit status".to_string(),
        )),
    }
    .or_else(|| stdout_err.map(ExecError::Stream))
    .or_else(|| stderr_err.map(ExecError::Stream));

    ExecOutput {
        stdout,
        stderr,
        error,
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> (String, Option<std::io::Error>) {
    let Some(mut reader) = reader else {
        return (String::new(), None);
    };

    let mut buf = Vec::new();
    let result = reader.read_to_end(&mut buf).await;
    (String::from_utf8_lossy(&buf).trim().to_string(), result.err())
}

/// Maps an exec status to an error, or `None` for success.
pub(crate) fn status_error(status: &Status) -> Option<ExecError> {
    if status.status.as_deref() == Some("Success") {
        return None;
    }

    let message = status.message.clone().unwrap_or_default();
    if status.reason.as_deref() == Some(NON_ZERO_EXIT_REASON) {
        return Some(ExecError::NonZeroExit {
            code: exit_code(status),
            message,
        });
    }

    if message.is_empty() {
        Some(ExecError::Failure(format!(
            "status {}",
            status.reason.as_deref().unwrap_or("unknown")
        )))
    } else {
        Some(ExecError::Failure(message))
    }
}

fn exit_code(status: &Status) -> Option<i32> {
    status
        .details
        .as_ref()?
        .causes
        .as_ref()?
        .iter()
        .find(|cause| cause.reason.as_deref() == Some(EXIT_CODE_CAUSE))
        .and_then(|cause| cause.message.as_deref())
        .and_then(|code| code.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{StatusCause, StatusDetails};
    use std::future::{ready, Ready};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    fn success() -> Status {
        Status {
            status: Some("Success".to_string()),
            ..Default::default()
        }
    }

    fn non_zero_exit(code: &str) -> Status {
        Status {
            status: Some("Failure".to_string()),
            reason: Some(NON_ZERO_EXIT_REASON.to_string()),
            message: Some(format!("command terminated with non-zero exit code: {code}")),
            details: Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    reason: Some(EXIT_CODE_CAUSE.to_string()),
                    message: Some(code.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn status(s: Status) -> Option<Ready<Option<Status>>> {
        Some(ready(Some(s)))
    }

    /// Yields an error on every read.
    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream reset")))
        }
    }

    #[tokio::test]
    async fn test_capture_success() {
        let output = capture(Some(&b"out\n"[..]), Some(&b""[..]), status(success())).await;

        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "");
        assert!(output.error.is_none());
    }

    #[tokio::test]
    async fn test_capture_trims_both_streams() {
        let output = capture(
            Some(&b"  reloaded \n\n"[..]),
            Some(&b"\twarning: stale pid\n"[..]),
            status(success()),
        )
        .await;

        assert_eq!(output.stdout, "reloaded");
        assert_eq!(output.stderr, "warning: stale pid");
        assert!(output.error.is_none());
    }

    #[tokio::test]
    async fn test_capture_non_zero_exit_keeps_output() {
        let output = capture(
            Some(&b"partial\n"[..]),
            Some(&b"boom\n"[..]),
            status(non_zero_exit("3")),
        )
        .await;

        assert_eq!(output.stdout, "partial");
        assert_eq!(output.stderr, "boom");
        match output.error {
            Some(ExecError::NonZeroExit { code, message }) => {
                assert_eq!(code, Some(3));
                assert!(message.contains("non-zero exit code"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_capture_missing_status() {
        let output = capture(
            Some(&b"out"[..]),
            None::<&[u8]>,
            Some(ready(None::<Status>)),
        )
        .await;

        assert_eq!(output.stdout, "out");
        assert!(matches!(output.error, Some(ExecError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_capture_read_error_keeps_partial_output() {
        let stdout = (&b"first line\n"[..]).chain(BrokenReader);
        let output = capture(Some(stdout), None::<&[u8]>, status(success())).await;

        assert_eq!(output.stdout, "first line");
        assert!(matches!(output.error, Some(ExecError::Stream(_))));
    }

    #[tokio::test]
    async fn test_status_error_takes_precedence_over_read_error() {
        let output = capture(Some(BrokenReader), None::<&[u8]>, status(non_zero_exit("1"))).await;

        assert!(matches!(output.error, Some(ExecError::NonZeroExit { code: Some(1), .. })));
    }

    #[test]
    fn test_status_error_success() {
        assert!(status_error(&success()).is_none());
    }

    #[test]
    fn test_status_error_unparseable_exit_code() {
        let err = status_error(&non_zero_exit("not-a-number"));
        assert!(matches!(err, Some(ExecError::NonZeroExit { code: None, .. })));
    }

    #[test]
    fn test_status_error_other_failure() {
        let status = Status {
            status: Some("Failure".to_string()),
            reason: Some("InternalError".to_string()),
            message: Some("container not found (\"sidecar\")".to_string()),
            ..Default::default()
        };

        match status_error(&status) {
            Some(ExecError::Failure(message)) => assert!(message.contains("container not found")),
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[test]
    fn test_status_error_failure_without_message() {
        let status = Status {
            status: Some("Failure".to_string()),
            reason: Some("InternalError".to_string()),
            ..Default::default()
        };

        match status_error(&status) {
            Some(ExecError::Failure(message)) => assert_eq!(message, "status InternalError"),
            other => panic!("expected Failure, got {other:?}"),
        }
    }
}
