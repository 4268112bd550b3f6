//! Scan orchestration
//!
//! [`Inspector::run`] drives one scan from discovery to cleanup: it fans out
//! one task per target on a bounded pool, collects classified results,
//! renders them and waits for the shutdown coordinator to tear everything
//! down.


use crate::aggregator::ResultSet;
use crate::cluster::ClusterClient;
use crate::config::InspectorConfig;
use crate::error::{ClusterError, RunError, SandboxError};
use crate::exec::RemoteExecutor;
use crate::models::{Outcome, Target, TargetReport};
use crate::observability::ScanLogger;
use crate::probe::{MetricProbe, ProbeRunner};
use crate::profile::ScanProfile;
use crate::report::{render, OutputFormat};
use crate::sandbox::SandboxProvider;
use crate::shutdown::{shutdown_signal, CleanupReport, ShutdownCoordinator};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of a completed scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub profile: String,
    pub targets: usize,
    pub warnings: usize,
    pub ok: usize,
    pub unknown: usize,
    pub interrupted: bool,
    pub cleanup: CleanupReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs a [`ScanProfile`] against a cluster
pub struct Inspector {
    cluster: Arc<dyn ClusterClient>,
    provider: Arc<dyn SandboxProvider>,
    profile: ScanProfile,
    config: InspectorConfig,
    logger: ScanLogger,
}

impl Inspector {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        provider: Arc<dyn SandboxProvider>,
        profile: ScanProfile,
        mut config: InspectorConfig,
    ) -> Self {
        if config.pool_size == 0 {
            warn!("Pool size 0 would never start a worker, using 1");
            config.pool_size = 1;
        }
        let logger = ScanLogger::new(profile.name.clone());
        Self {
            cluster,
            provider,
            profile,
            config,
            logger,
        }
    }

    /// Build an inspector with the profile's own sandbox provider
    pub fn for_profile(
        cluster: Arc<dyn ClusterClient>,
        profile: ScanProfile,
        config: InspectorConfig,
    ) -> Self {
        let logger = ScanLogger::new(profile.name.clone());
        let provider = profile.provider(cluster.clone(), &config, logger.clone());
        Self::new(cluster, provider, profile, config)
    }

    pub fn profile(&self) -> &ScanProfile {
        &self.profile
    }

    /// Run the scan, cleaning up on SIGINT or SIGTERM
    pub async fn run(
        &self,
        filter: Option<&str>,
        format: OutputFormat,
        out: &mut dyn Write,
    ) -> Result<ScanSummary, RunError> {
        self.run_until(filter, format, out, shutdown_signal()).await
    }

    /// Run the scan, treating `interrupt` resolving as an operator interrupt
    pub async fn run_until<F>(
        &self,
        filter: Option<&str>,
        format: OutputFormat,
        out: &mut dyn Write,
        interrupt: F,
    ) -> Result<ScanSummary, RunError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let started_at = Utc::now();
        let api_timeout = self.config.k8s_timeout();

        let targets = self
            .profile
            .query
            .discover(self.cluster.as_ref(), filter, api_timeout)
            .await?;
        self.logger
            .log_scan_started(targets.len(), self.config.pool_size);

        if let Some(namespace) = self.provider.managed_namespace() {
            self.ensure_namespace(namespace, api_timeout).await?;
        }

        let run = CancellationToken::new();
        let coordinator = ShutdownCoordinator::new(
            self.cluster.clone(),
            self.provider.clone(),
            &targets,
            &self.config,
            self.logger.clone(),
        )
        .spawn(run.clone(), interrupt);

        let results = Arc::new(ResultSet::new(self.config.warning_ratio));
        let worker = Worker {
            executor: RemoteExecutor::new(self.cluster.clone()),
            provider: self.provider.clone(),
            metrics: Arc::from(self.profile.metrics.clone()),
            exec_timeout: self.config.exec_timeout(self.profile.exec_timeout),
            results: results.clone(),
            logger: self.logger.clone(),
            run: run.clone(),
        };
        self.fan_out(&targets, worker, &run).await;

        let rows = results.classified().await;
        let rendered =
            render(&rows, &self.profile.layout, format, out).map_err(RunError::Render);

        run.cancel();
        let cleanup = coordinator.wait().await;
        rendered?;

        Ok(ScanSummary {
            profile: self.profile.name.clone(),
            targets: targets.len(),
            warnings: rows.warning.len(),
            ok: rows.ok.len(),
            unknown: rows.unknown.len(),
            interrupted: cleanup.interrupted,
            cleanup,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn ensure_namespace(&self, namespace: &str, timeout: Duration) -> Result<(), RunError> {
        let created = tokio::time::timeout(timeout, self.cluster.create_namespace(namespace))
            .await
            .map_err(|_| ClusterError::Timeout(timeout))
            .and_then(|r| r);

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => {
                debug!(namespace = %namespace, "Namespace already exists");
                Ok(())
            }
            Err(source) => Err(RunError::Namespace {
                namespace: namespace.to_string(),
                source,
            }),
        }
    }

    /// Inspect every target with at most `pool_size` in flight
    ///
    /// Targets not yet started when the run is cancelled are skipped.
    async fn fan_out(&self, targets: &[Target], worker: Worker, run: &CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.config.pool_size));
        let mut tasks = JoinSet::new();

        for target in targets {
            let permit = tokio::select! {
                _ = run.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = worker.clone();
            let target = target.clone();
            tasks.spawn(async move {
                worker.inspect(target).await;
                drop(permit);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Inspection task failed");
            }
        }
    }
}

/// Per-target work shared by every pool task
#[derive(Clone)]
struct Worker {
    executor: RemoteExecutor,
    provider: Arc<dyn SandboxProvider>,
    metrics: Arc<[MetricProbe]>,
    exec_timeout: Duration,
    results: Arc<ResultSet>,
    logger: ScanLogger,
    run: CancellationToken,
}

impl Worker {
    async fn inspect(&self, target: Target) {
        self.logger.log_target_started(&target.name);
        let sandbox = match self.provider.acquire(&target, &self.run).await {
            Ok(sandbox) => sandbox,
            Err(SandboxError::Cancelled(name)) => {
                debug!(target = %target.name, sandbox = %name, "Skipping cancelled target");
                return;
            }
            Err(e) => {
                let error = e.to_string();
                self.logger.log_target_unavailable(&target.name, &error);
                self.results
                    .record(TargetReport::unavailable(&target, error))
                    .await;
                return;
            }
        };

        let runner = ProbeRunner::new(&self.executor, &sandbox, self.exec_timeout, &self.run);
        let mut samples = Vec::new();
        for probe in self.metrics.iter() {
            if self.run.is_cancelled() {
                break;
            }
            let Some(sample) = runner.sample(probe).await else {
                debug!(target = %target.name, metric = %probe.name, "Metric not present");
                continue;
            };
            if let Outcome::Failed { error } = &sample.outcome {
                self.logger
                    .log_probe_failed(&target.name, &sample.metric, error);
            }
            samples.push(sample);
        }

        self.provider.release(&sandbox).await;

        let failed = samples
            .iter()
            .filter(|s| matches!(s.outcome, Outcome::Failed { .. }))
            .count();
        self.logger
            .log_target_inspected(&target.name, samples.len() - failed, failed);
        self.results
            .record(TargetReport::measured(&target, samples))
            .await;
    }
}
