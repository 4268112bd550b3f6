//! Sandbox providers
//!
//! A [`SandboxProvider`] turns a [`Target`] into a [`Sandbox`] that probes can
//! exec into. [`EphemeralSandboxes`] creates a privileged inspector pod per
//! node and deletes it afterwards. [`AgentPods`] reuses the agent pod already
//! running on the node and never creates or deletes anything.

use crate::cluster::{ClusterClient, SandboxSpec};
use crate::error::{ClusterError, SandboxError};
use crate::models::{Sandbox, SandboxPhase, Target};
use crate::observability::ScanLogger;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Strategy for obtaining an execution environment per target
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Namespace this provider creates sandboxes in and must tear down
    fn managed_namespace(&self) -> Option<&str>;

    /// Deterministic name of the sandbox this provider would declare for `target`
    fn sandbox_name(&self, target: &Target) -> Option<String>;

    /// Obtain a ready sandbox for `target`
    async fn acquire(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<Sandbox, SandboxError>;

    /// Give back a sandbox obtained from [`acquire`](Self::acquire)
    async fn release(&self, sandbox: &Sandbox);

    /// Delete a sandbox by name; absence is not an error
    async fn delete(&self, name: &str);
}

/// Fixed shape of the inspector pods
#[derive(Debug, Clone)]
pub struct SandboxTemplate {
    pub name_prefix: String,
    pub namespace: String,
    pub container: String,
    pub image: String,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub capabilities: Vec<String>,
    pub host_path: String,
}

impl Default for SandboxTemplate {
    fn default() -> Self {
        Self {
            name_prefix: "bpf-inspector".to_string(),
            namespace: "bpf-inspect".to_string(),
            container: "bpf-inspector".to_string(),
            image: "gyutaeb/bpftool:v7.5.0".to_string(),
            cpu_request: "0".to_string(),
            cpu_limit: "200m".to_string(),
            capabilities: ["SYS_ADMIN", "SYS_RESOURCE", "NET_ADMIN", "NET_RAW"]
                .into_iter()
                .map(String::from)
                .collect(),
            host_path: "/sys/fs/bpf".to_string(),
        }
    }
}

impl SandboxTemplate {
    pub fn sandbox_name(&self, target: &str) -> String {
        format!("{}-{}", self.name_prefix, target)
    }

    pub fn spec_for(&self, target: &str) -> SandboxSpec {
        SandboxSpec {
            name: self.sandbox_name(target),
            namespace: self.namespace.clone(),
            node_name: target.to_string(),
            container: self.container.clone(),
            image: self.image.clone(),
            command: vec!["sleep".to_string(), "infinity".to_string()],
            cpu_request: self.cpu_request.clone(),
            cpu_limit: self.cpu_limit.clone(),
            capabilities: self.capabilities.clone(),
            host_path: self.host_path.clone(),
        }
    }
}

/// Creates one privileged inspector pod per node
pub struct EphemeralSandboxes {
    cluster: Arc<dyn ClusterClient>,
    template: SandboxTemplate,
    api_timeout: Duration,
    ready_timeout: Duration,
    poll_interval: Duration,
    logger: ScanLogger,
}

impl EphemeralSandboxes {
    pub fn new(cluster: Arc<dyn ClusterClient>, template: SandboxTemplate) -> Self {
        Self {
            cluster,
            template,
            api_timeout: Duration::from_secs(60),
            ready_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
            logger: ScanLogger::new("sandbox"),
        }
    }

    /// Set the timeout for individual API calls
    pub fn api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    /// Set how long to wait for a sandbox to start running
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the interval between phase checks
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_logger(mut self, logger: ScanLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn template(&self) -> &SandboxTemplate {
        &self.template
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, ClusterError>>,
    {
        tokio::time::timeout(self.api_timeout, fut)
            .await
            .map_err(|_| ClusterError::Timeout(self.api_timeout))?
    }

    /// Declare the inspector pod for `target`, reusing one that already exists
    pub async fn create(&self, target: &Target) -> Result<Sandbox, SandboxError> {
        let spec = self.template.spec_for(&target.name);

        let reused = match self.call(self.cluster.create_pod(&spec)).await {
            Ok(()) => false,
            Err(e) if e.is_already_exists() => true,
            Err(source) => {
                return Err(SandboxError::Create {
                    name: spec.name,
                    source,
                })
            }
        };
        self.logger
            .log_sandbox_created(&target.name, &spec.name, reused);

        Ok(Sandbox {
            name: spec.name,
            namespace: spec.namespace,
            container: spec.container,
            target: target.name.clone(),
            phase: SandboxPhase::Pending,
        })
    }

    /// Poll until the sandbox is running, the timeout elapses, or the scan is cancelled
    pub async fn wait_ready(
        &self,
        sandbox: &mut Sandbox,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), SandboxError> {
        let deadline = Instant::now() + timeout;

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(SandboxError::Cancelled(sandbox.name.clone()));
                }
                polled = self.call(self.cluster.pod_phase(&sandbox.namespace, &sandbox.name)) => polled,
            };
            let phase = polled.map_err(|source| SandboxError::Get {
                name: sandbox.name.clone(),
                source,
            })?;
            sandbox.phase = phase;

            match phase {
                SandboxPhase::Running => return Ok(()),
                SandboxPhase::Failed => {
                    return Err(SandboxError::Failed {
                        name: sandbox.name.clone(),
                    })
                }
                SandboxPhase::Pending | SandboxPhase::Unknown => {
                    debug!(sandbox = %sandbox.name, phase = ?phase, "Waiting for sandbox");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SandboxError::NotReady {
                    name: sandbox.name.clone(),
                    timeout,
                });
            }

            let next = (now + self.poll_interval).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(SandboxError::Cancelled(sandbox.name.clone()));
                }
                _ = tokio::time::sleep_until(next) => {}
            }
        }
    }
}

#[async_trait]
impl SandboxProvider for EphemeralSandboxes {
    fn managed_namespace(&self) -> Option<&str> {
        Some(&self.template.namespace)
    }

    fn sandbox_name(&self, target: &Target) -> Option<String> {
        Some(self.template.sandbox_name(&target.name))
    }

    async fn acquire(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<Sandbox, SandboxError> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled(
                self.template.sandbox_name(&target.name),
            ));
        }

        let mut sandbox = self.create(target).await?;
        if let Err(e) = self.wait_ready(&mut sandbox, self.ready_timeout, cancel).await {
            self.delete(&sandbox.name).await;
            return Err(e);
        }
        Ok(sandbox)
    }

    async fn release(&self, sandbox: &Sandbox) {
        self.delete(&sandbox.name).await;
    }

    async fn delete(&self, name: &str) {
        let namespace = &self.template.namespace;
        match self.call(self.cluster.delete_pod(namespace, name)).await {
            Ok(()) => self.logger.log_sandbox_deleted(name),
            Err(e) if e.is_not_found() => {
                debug!(sandbox = %name, "Sandbox already gone");
            }
            Err(e) => {
                warn!(sandbox = %name, error = %e, "Failed to delete sandbox");
            }
        }
    }
}

/// Runs probes in the agent pod already scheduled on each node
pub struct AgentPods {
    namespace: String,
    container: String,
}

impl AgentPods {
    pub fn new(namespace: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            container: container.into(),
        }
    }
}

#[async_trait]
impl SandboxProvider for AgentPods {
    fn managed_namespace(&self) -> Option<&str> {
        None
    }

    fn sandbox_name(&self, _target: &Target) -> Option<String> {
        None
    }

    async fn acquire(
        &self,
        target: &Target,
        _cancel: &CancellationToken,
    ) -> Result<Sandbox, SandboxError> {
        let pod = target
            .process
            .clone()
            .ok_or_else(|| SandboxError::NoProcess(target.name.clone()))?;

        Ok(Sandbox {
            name: pod,
            namespace: self.namespace.clone(),
            container: self.container.clone(),
            target: target.name.clone(),
            phase: SandboxPhase::Running,
        })
    }

    async fn release(&self, _sandbox: &Sandbox) {}

    async fn delete(&self, _name: &str) {}
}
