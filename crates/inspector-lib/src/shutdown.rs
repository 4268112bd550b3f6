//! Shutdown coordination
//!
//! The coordinator is armed before any sandbox can exist and owns the final
//! teardown of the managed namespace. It wakes exactly once: either on the
//! first interrupt, which cancels the run, or when the orchestrator cancels
//! the run after rendering.

use crate::cluster::ClusterClient;
use crate::config::InspectorConfig;
use crate::error::ClusterError;
use crate::models::Target;
use crate::observability::ScanLogger;
use crate::sandbox::SandboxProvider;
use colored::Colorize;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Lifecycle of the coordinator; transitions are one-way
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CoordinatorState {
    Idle,
    Armed,
    Draining,
    Finalized,
}

/// What the coordinator did while draining
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub interrupted: bool,
    pub sandboxes_deleted: usize,
    pub namespace_deleted: bool,
}

/// Tears down every sandbox of a run on interrupt or completion
pub struct ShutdownCoordinator {
    cluster: Arc<dyn ClusterClient>,
    provider: Arc<dyn SandboxProvider>,
    sandbox_names: Vec<String>,
    api_timeout: Duration,
    poll_interval: Duration,
    wait_timeout: Duration,
    logger: ScanLogger,
    state: watch::Sender<CoordinatorState>,
}

/// Running coordinator task
pub struct CoordinatorHandle {
    task: JoinHandle<CleanupReport>,
    state: watch::Receiver<CoordinatorState>,
}

impl CoordinatorHandle {
    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn watch(&self) -> watch::Receiver<CoordinatorState> {
        self.state.clone()
    }

    /// Wait for the coordinator to reach `Finalized`
    pub async fn wait(self) -> CleanupReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Shutdown coordinator task failed");
                CleanupReport::default()
            }
        }
    }
}

impl ShutdownCoordinator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        provider: Arc<dyn SandboxProvider>,
        targets: &[Target],
        config: &InspectorConfig,
        logger: ScanLogger,
    ) -> Self {
        let sandbox_names = targets
            .iter()
            .filter_map(|t| provider.sandbox_name(t))
            .collect();
        let (state, _) = watch::channel(CoordinatorState::Idle);

        Self {
            cluster,
            provider,
            sandbox_names,
            api_timeout: config.k8s_timeout(),
            poll_interval: config.cleanup_poll_interval(),
            wait_timeout: config.k8s_timeout(),
            logger,
            state,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Arm the coordinator and start waiting in the background
    ///
    /// `interrupt` resolving first cancels `run`; `run` being cancelled by
    /// its owner starts an orderly teardown instead.
    pub fn spawn<F>(self, run: CancellationToken, interrupt: F) -> CoordinatorHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.state.send_replace(CoordinatorState::Armed);
        let state = self.state.subscribe();

        let task = tokio::spawn(async move {
            let interrupted = tokio::select! {
                _ = run.cancelled() => false,
                _ = interrupt => true,
            };

            self.state.send_replace(CoordinatorState::Draining);
            if interrupted {
                run.cancel();
                eprintln!("{}", "Please wait for cleanup to complete...".yellow());
            }

            let report = self.drain(interrupted).await;
            self.state.send_replace(CoordinatorState::Finalized);
            report
        });

        CoordinatorHandle { task, state }
    }

    async fn drain(&self, interrupted: bool) -> CleanupReport {
        self.logger
            .log_cleanup_started(interrupted, self.sandbox_names.len());

        for name in &self.sandbox_names {
            self.provider.delete(name).await;
        }

        let mut report = CleanupReport {
            interrupted,
            sandboxes_deleted: self.sandbox_names.len(),
            namespace_deleted: false,
        };

        if let Some(namespace) = self.provider.managed_namespace() {
            self.wait_for_sandboxes(namespace).await;
            report.namespace_deleted = self.delete_namespace(namespace).await;
            if report.namespace_deleted {
                eprintln!("{}", "All inspector pods deleted successfully.".yellow());
            }
        }

        self.logger.log_cleanup_finished(report.namespace_deleted);
        report
    }

    async fn remaining(&self, namespace: &str) -> Result<usize, ClusterError> {
        tokio::time::timeout(self.api_timeout, self.cluster.list_pods(namespace, None))
            .await
            .map_err(|_| ClusterError::Timeout(self.api_timeout))?
            .map(|pods| pods.len())
    }

    /// Poll until the namespace holds no sandboxes or the wait bound elapses
    async fn wait_for_sandboxes(&self, namespace: &str) {
        let deadline = Instant::now() + self.wait_timeout;

        loop {
            match self.remaining(namespace).await {
                Ok(0) => return,
                Ok(n) => eprintln!(
                    "{}",
                    format!("Waiting for inspector pods to be deleted... Remaining pods: {n}")
                        .yellow()
                ),
                Err(e) if e.is_not_found() => return,
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Failed to list remaining sandboxes");
                    return;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    namespace = %namespace,
                    timeout = ?self.wait_timeout,
                    "Sandboxes still present, deleting namespace anyway"
                );
                return;
            }
            tokio::time::sleep_until((now + self.poll_interval).min(deadline)).await;
        }
    }

    async fn delete_namespace(&self, namespace: &str) -> bool {
        let result = tokio::time::timeout(self.api_timeout, self.cluster.delete_namespace(namespace))
            .await
            .map_err(|_| ClusterError::Timeout(self.api_timeout))
            .and_then(|r| r);

        match result {
            Ok(()) => true,
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Failed to delete namespace");
                false
            }
        }
    }
}

/// Resolve on the first SIGINT or SIGTERM
///
/// Once the handlers are installed later signals no longer terminate the
/// process, so a second Ctrl-C cannot abort an in-flight cleanup.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{FakeCluster, FakeNode};
    use crate::sandbox::{AgentPods, EphemeralSandboxes, SandboxTemplate};
    use tokio::sync::oneshot;

    fn targets() -> Vec<Target> {
        vec![Target::node("node-1"), Target::node("node-2")]
    }

    async fn setup() -> (Arc<FakeCluster>, ShutdownCoordinator) {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_node("node-1", FakeNode::ready())
                .with_node("node-2", FakeNode::ready()),
        );
        cluster.create_namespace("bpf-inspect").await.unwrap();
        let provider = Arc::new(EphemeralSandboxes::new(
            cluster.clone(),
            SandboxTemplate::default(),
        ));
        let coordinator = ShutdownCoordinator::new(
            cluster.clone(),
            provider,
            &targets(),
            &InspectorConfig::default(),
            ScanLogger::new("test"),
        );
        (cluster, coordinator)
    }

    fn interrupt_channel() -> (oneshot::Sender<()>, impl Future<Output = ()> + Send + 'static) {
        let (tx, rx) = oneshot::channel::<()>();
        (tx, async move {
            let _ = rx.await;
        })
    }

    #[tokio::test]
    async fn test_interrupt_cancels_run_and_cleans_up() {
        let (cluster, coordinator) = setup().await;
        for t in targets() {
            cluster
                .create_pod(&SandboxTemplate::default().spec_for(&t.name))
                .await
                .unwrap();
        }
        assert_eq!(coordinator.state(), CoordinatorState::Idle);

        let run = CancellationToken::new();
        let (tx, interrupt) = interrupt_channel();
        let handle = coordinator.spawn(run.clone(), interrupt);
        assert_eq!(handle.state(), CoordinatorState::Armed);

        tx.send(()).unwrap();
        let mut states = handle.watch();
        let report = handle.wait().await;

        assert!(run.is_cancelled());
        assert!(report.interrupted);
        assert_eq!(report.sandboxes_deleted, 2);
        assert!(report.namespace_deleted);
        assert_eq!(*states.borrow_and_update(), CoordinatorState::Finalized);
        assert!(cluster.live_pods("bpf-inspect").is_empty());
        assert!(!cluster.has_namespace("bpf-inspect"));
    }

    #[tokio::test]
    async fn test_normal_completion_finalizes_quietly() {
        let (cluster, coordinator) = setup().await;

        let run = CancellationToken::new();
        let (_tx, interrupt) = interrupt_channel();
        let handle = coordinator.spawn(run.clone(), interrupt);

        run.cancel();
        let report = handle.wait().await;

        assert!(!report.interrupted);
        assert!(report.namespace_deleted);
        assert_eq!(cluster.namespace_deletes(), 1);
        // deletes of already-released sandboxes are tolerated
        assert_eq!(cluster.pod_deletes(), 2);
    }

    #[tokio::test]
    async fn test_missing_namespace_is_success() {
        let (cluster, coordinator) = setup().await;
        cluster.delete_namespace("bpf-inspect").await.unwrap();

        let run = CancellationToken::new();
        let (_tx, interrupt) = interrupt_channel();
        let handle = coordinator.spawn(run.clone(), interrupt);
        run.cancel();

        let report = handle.wait().await;
        assert!(report.namespace_deleted);
    }

    #[tokio::test]
    async fn test_agent_pods_leave_cluster_untouched() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_node("node-1", FakeNode::ready())
                .with_agent_pod("kube-system", "cilium-abcde", "node-1"),
        );
        let provider = Arc::new(AgentPods::new("kube-system", "cilium-agent"));
        let coordinator = ShutdownCoordinator::new(
            cluster.clone(),
            provider,
            &[Target::with_process("node-1", "cilium-abcde")],
            &InspectorConfig::default(),
            ScanLogger::new("test"),
        );

        let run = CancellationToken::new();
        let (tx, interrupt) = interrupt_channel();
        let handle = coordinator.spawn(run.clone(), interrupt);
        tx.send(()).unwrap();

        let report = handle.wait().await;
        assert!(run.is_cancelled());
        assert_eq!(report.sandboxes_deleted, 0);
        assert!(!report.namespace_deleted);
        assert_eq!(cluster.pod_deletes(), 0);
        assert_eq!(cluster.namespace_deletes(), 0);
        assert_eq!(cluster.live_pods("kube-system"), vec!["cilium-abcde"]);
    }

    #[tokio::test]
    async fn test_only_first_wakeup_counts() {
        let (cluster, coordinator) = setup().await;

        let run = CancellationToken::new();
        let (tx, interrupt) = interrupt_channel();
        let handle = coordinator.spawn(run.clone(), interrupt);

        run.cancel();
        let report = handle.wait().await;
        // a signal arriving after the coordinator finished changes nothing
        let _ = tx.send(());

        assert!(!report.interrupted);
        assert_eq!(cluster.namespace_deletes(), 1);
    }
}
