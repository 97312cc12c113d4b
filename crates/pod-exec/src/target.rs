//! Where and what to execute.

use std::fmt;

/// A pod, an optional container within it, and the argv to run there.
///
/// Built once at startup and never changed afterwards: every run executes the
/// same command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    /// Namespace of the pod
    pub namespace: String,
    /// Name of the pod
    pub pod: String,
    /// Container inside the pod; `None` lets the API server pick the default container
    pub container: Option<String>,
    /// Command and arguments
    pub command: Vec<String>,
}

impl ExecTarget {
    /// Creates a new exec target.
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: Option<String>,
        command: Vec<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.filter(|c| !c.is_empty()),
            command,
        }
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)?;
        if let Some(container) = &self.container {
            write!(f, " [{container}]")?;
        }
        Ok(())
    }
}
