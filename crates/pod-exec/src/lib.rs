//! Pod command execution
//!
//! Runs a fixed command inside a Kubernetes container through the `pods/exec`
//! subresource and collects what it wrote to stdout and stderr.
//!
//! # Example
//!
//! ```no_run
//! use pod_exec::{CommandRunner, ExecTarget, PodCommandRunner};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let target = ExecTarget::new("default", "web-0", Some("nginx".to_string()), vec![
//!     "nginx".to_string(),
//!     "-s".to_string(),
//!     "reload".to_string(),
//! ]);
//! let runner = PodCommandRunner::new(client, target);
//!
//! let output = runner.run().await;
//! if let Some(err) = &output.error {
//!     eprintln!("reload failed: {err}");
//! }
//! println!("{}", output.stdout);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod runner;
pub mod target;
#[path = "trait.rs"]
pub mod runner_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use error::ExecError;
pub use runner::{ExecOutput, PodCommandRunner};
pub use runner_trait::CommandRunner;
pub use target::ExecTarget;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockCommandRunner;
