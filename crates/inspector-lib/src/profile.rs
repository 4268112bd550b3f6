//! Scan profiles
//!
//! A profile bundles everything that differs between scans: how targets are
//! discovered, where probes run, which metrics are measured and how the
//! report is laid out.

use crate::cluster::ClusterClient;
use crate::config::InspectorConfig;
use crate::error::{ClusterError, RunError};
use crate::models::Target;
use crate::observability::ScanLogger;
use crate::probe::{MetricProbe, GLOBALS_DIR};
use crate::report::{ReportLayout, SourceColumn};
use crate::sandbox::{AgentPods, EphemeralSandboxes, SandboxProvider, SandboxTemplate};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Core Cilium maps inspected by `bpf-map-pressure`
pub const BPF_MAP_NAMES: [&str; 8] = [
    "cilium_ct4_global",
    "cilium_ct6_global",
    "cilium_ct_any4_global",
    "cilium_ct_any6_global",
    "cilium_nodeport_neigh4",
    "cilium_nodeport_neigh6",
    "cilium_snat_v4_external",
    "cilium_snat_v6_external",
];

pub const CILIUM_NAMESPACE: &str = "kube-system";
pub const CILIUM_AGENT_SELECTOR: &str = "k8s-app=cilium";
pub const CILIUM_AGENT_CONTAINER: &str = "cilium-agent";

const BPF_MAP_HINT: &str = "If you see [Warning] status in the output and encounter network issues,\n\
Please consider increasing --bpf-map-dynamic-size-ratio in cilium-agent configuration.";

const SNAT_HINT: &str = "Nodes in [Warning] status are at risk of high SNAT map eviction rates.\n\
Consider draining and rebooting them. See https://github.com/cilium/cilium/pull/37747";

/// How targets are found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetQuery {
    /// Every node in the cluster
    Nodes,
    /// One target per scheduled agent pod, named after its node
    AgentPods {
        namespace: String,
        label_selector: String,
    },
}

impl TargetQuery {
    async fn list(&self, cluster: &dyn ClusterClient) -> Result<Vec<Target>, ClusterError> {
        match self {
            TargetQuery::Nodes => Ok(cluster
                .list_nodes()
                .await?
                .into_iter()
                .map(Target::node)
                .collect()),
            TargetQuery::AgentPods {
                namespace,
                label_selector,
            } => {
                let pods = cluster.list_pods(namespace, Some(label_selector)).await?;
                Ok(pods
                    .into_iter()
                    .filter_map(|pod| match pod.node_name {
                        Some(node) => Some(Target::with_process(node, pod.name)),
                        None => {
                            debug!(pod = %pod.name, "Skipping unscheduled agent pod");
                            None
                        }
                    })
                    .collect())
            }
        }
    }

    /// List targets, keeping only the one named `filter` when given
    ///
    /// An empty result is fatal so that no sandbox is ever created for a run
    /// that has nothing to inspect.
    pub async fn discover(
        &self,
        cluster: &dyn ClusterClient,
        filter: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<Target>, RunError> {
        let mut targets = tokio::time::timeout(timeout, self.list(cluster))
            .await
            .map_err(|_| RunError::Discovery(ClusterError::Timeout(timeout)))?
            .map_err(RunError::Discovery)?;

        if let Some(name) = filter.filter(|f| !f.is_empty()) {
            targets.retain(|t| t.name == name);
        }
        if targets.is_empty() {
            return Err(RunError::NoTargets);
        }
        Ok(targets)
    }
}

/// Where probes for a profile run
#[derive(Debug, Clone)]
pub enum SandboxKind {
    Ephemeral(SandboxTemplate),
    Agent { namespace: String, container: String },
}

/// A complete scan definition
#[derive(Debug, Clone)]
pub struct ScanProfile {
    pub name: String,
    pub query: TargetQuery,
    pub sandbox: SandboxKind,
    pub metrics: Vec<MetricProbe>,
    pub exec_timeout: Duration,
    pub layout: ReportLayout,
}

impl ScanProfile {
    /// Inspect the core Cilium maps on every node from a privileged pod
    pub fn bpf_map_pressure() -> Self {
        Self {
            name: "bpf-map-pressure".to_string(),
            query: TargetQuery::Nodes,
            sandbox: SandboxKind::Ephemeral(SandboxTemplate::default()),
            metrics: BPF_MAP_NAMES
                .iter()
                .map(|map| MetricProbe::pinned_map(GLOBALS_DIR, map))
                .collect(),
            exec_timeout: Duration::from_secs(1800),
            layout: ReportLayout {
                target_header: "NODE".to_string(),
                source_header: "MAP".to_string(),
                usage_header: "USAGE".to_string(),
                source: SourceColumn::Metric,
                hint: Some(BPF_MAP_HINT.to_string()),
            },
        }
    }

    /// Check SNAT map pressure through each node's cilium-agent pod
    pub fn snat_eviction() -> Self {
        Self {
            name: "snat-eviction".to_string(),
            query: TargetQuery::AgentPods {
                namespace: CILIUM_NAMESPACE.to_string(),
                label_selector: CILIUM_AGENT_SELECTOR.to_string(),
            },
            sandbox: SandboxKind::Agent {
                namespace: CILIUM_NAMESPACE.to_string(),
                container: CILIUM_AGENT_CONTAINER.to_string(),
            },
            metrics: vec![
                MetricProbe::pinned_map(GLOBALS_DIR, "cilium_snat_v4_external")
                    .without_existence_check(),
            ],
            exec_timeout: Duration::from_secs(10),
            layout: ReportLayout {
                target_header: "NODE".to_string(),
                source_header: "CILIUM-POD".to_string(),
                usage_header: "SNAT-MAP-USAGE".to_string(),
                source: SourceColumn::Process,
                hint: Some(SNAT_HINT.to_string()),
            },
        }
    }

    /// Build the sandbox provider for this profile
    pub fn provider(
        &self,
        cluster: Arc<dyn ClusterClient>,
        config: &InspectorConfig,
        logger: ScanLogger,
    ) -> Arc<dyn SandboxProvider> {
        match &self.sandbox {
            SandboxKind::Ephemeral(template) => {
                let template = SandboxTemplate {
                    image: config.image.clone(),
                    cpu_limit: config.cpu_limit.clone(),
                    ..template.clone()
                };
                Arc::new(
                    EphemeralSandboxes::new(cluster, template)
                        .api_timeout(config.k8s_timeout())
                        .ready_timeout(config.k8s_timeout())
                        .poll_interval(config.ready_poll_interval())
                        .with_logger(logger),
                )
            }
            SandboxKind::Agent {
                namespace,
                container,
            } => Arc::new(AgentPods::new(namespace.clone(), container.clone())),
        }
    }
}
