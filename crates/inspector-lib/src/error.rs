//! Error types for the inspection engine
//!
//! Errors are split by layer. Only [`RunError`] ever escapes
//! [`Inspector::run`](crate::Inspector::run); everything below it is captured
//! as data on the affected target or metric.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by a [`ClusterClient`](crate::cluster::ClusterClient)
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl ClusterError {
    /// Map a kube error, separating the two conditions callers treat as success
    pub fn from_kube(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(resp.message),
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                ClusterError::AlreadyExists(resp.message)
            }
            other => ClusterError::Kube(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }
}

/// Errors from running a command inside a sandbox
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("command cancelled")]
    Cancelled,

    #[error("command terminated with exit code {code}{}", stderr_suffix(stderr))]
    NonZeroExit { code: i32, stderr: String },

    #[error("exec stream failed: {0}")]
    Stream(#[from] ClusterError),
}

impl ExecError {
    /// True when the command reported absence through exit code 1
    pub fn is_absent(&self) -> bool {
        matches!(self, ExecError::NonZeroExit { code: 1, .. })
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Errors while acquiring a sandbox for a target
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create sandbox {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to get sandbox {name}: {source}")]
    Get {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("sandbox {name} did not become ready within {timeout:?}")]
    NotReady { name: String, timeout: Duration },

    #[error("sandbox {name} failed before becoming ready")]
    Failed { name: String },

    #[error("target {0} has no agent pod to run probes in")]
    NoProcess(String),

    #[error("scan cancelled before sandbox {0} became ready")]
    Cancelled(String),
}

/// Errors from a single metric probe
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("unexpected probe output {output:?}: {source}")]
    Parse {
        output: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("capacity is zero, usage is undefined")]
    ZeroCapacity,
}

/// Fatal errors that abort a run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no targets found")]
    NoTargets,

    #[error("failed to discover targets: {0}")]
    Discovery(#[source] ClusterError),

    #[error("failed to ensure namespace {namespace}: {source}")]
    Namespace {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to render report: {0}")]
    Render(#[source] std::io::Error),
}
