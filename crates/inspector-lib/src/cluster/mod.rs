//! Cluster API seam
//!
//! Everything the engine needs from Kubernetes goes through
//! [`ClusterClient`], so the orchestration logic can run against an
//! in-memory cluster in tests. "Not found" and "already exists" surface as
//! distinct [`ClusterError`] variants.

mod kube_client;

#[cfg(test)]
pub(crate) mod fake;

pub use kube_client::{build_pod, exit_code_from_status, KubeCluster};

use crate::error::ClusterError;
use crate::models::SandboxPhase;
use async_trait::async_trait;

/// A pod as seen by target discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub node_name: Option<String>,
}

/// Declarative description of an ephemeral inspector pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
    pub container: String,
    pub image: String,
    pub command: Vec<String>,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub capabilities: Vec<String>,
    /// Host directory mounted read-only at the same path in the container
    pub host_path: String,
}

/// Captured result of a finished remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Operations the engine performs against the cluster
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List the names of all nodes
    async fn list_nodes(&self) -> Result<Vec<String>, ClusterError>;

    /// List pods in a namespace, optionally filtered by label selector
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<PodSummary>, ClusterError>;

    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError>;

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError>;

    async fn create_pod(&self, spec: &SandboxSpec) -> Result<(), ClusterError>;

    async fn pod_phase(&self, namespace: &str, name: &str) -> Result<SandboxPhase, ClusterError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Run a command in a container and wait for it to exit
    ///
    /// A non-zero exit is reported through [`ExecOutput::exit_code`], not as
    /// an error.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError>;
}
