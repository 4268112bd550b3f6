//! [`ClusterClient`] backed by a live Kubernetes API server

use super::{ClusterClient, ExecOutput, PodSummary, SandboxSpec};
use crate::error::ClusterError;
use crate::models::SandboxPhase;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Capabilities, Container, HostPathVolumeSource, Namespace, Node, Pod, PodSpec,
    ResourceRequirements, SecurityContext, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Status};
use kube::api::{AttachParams, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY: &str = "kubectl-cilium";
const BPFFS_VOLUME: &str = "bpffs";

/// Cluster client talking to the Kubernetes API
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig, or infer one when absent
    pub async fn from_kubeconfig(path: Option<&Path>) -> Result<Self, ClusterError> {
        let config = match path {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ClusterError::Other(format!(
                        "failed to read kubeconfig {}: {e}",
                        path.display()
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ClusterError::Other(format!("failed to load kubeconfig: {e}")))?
            }
            None => Config::infer()
                .await
                .map_err(|e| ClusterError::Other(format!("failed to infer kubeconfig: {e}")))?,
        };

        let client = Client::try_from(config).map_err(ClusterError::Kube)?;
        Ok(Self::new(client))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list_nodes(&self) -> Result<Vec<String>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(ClusterError::from_kube)?;

        Ok(nodes
            .items
            .into_iter()
            .filter_map(|node| node.metadata.name)
            .collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<PodSummary>, ClusterError> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }

        let pods = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(ClusterError::from_kube)?;

        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| {
                let name = pod.metadata.name?;
                let node_name = pod.spec.and_then(|spec| spec.node_name);
                Some(PodSummary { name, node_name })
            })
            .collect())
    }

    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(managed_labels()),
                ..Default::default()
            },
            ..Default::default()
        };

        api.create(&PostParams::default(), &namespace)
            .await
            .map_err(ClusterError::from_kube)?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(ClusterError::from_kube)?;
        Ok(())
    }

    async fn create_pod(&self, spec: &SandboxSpec) -> Result<(), ClusterError> {
        self.pods(&spec.namespace)
            .create(&PostParams::default(), &build_pod(spec))
            .await
            .map_err(ClusterError::from_kube)?;
        Ok(())
    }

    async fn pod_phase(&self, namespace: &str, name: &str) -> Result<SandboxPhase, ClusterError> {
        let pod = self
            .pods(namespace)
            .get(name)
            .await
            .map_err(ClusterError::from_kube)?;

        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        Ok(SandboxPhase::from_pod_phase(phase))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(ClusterError::from_kube)?;
        Ok(())
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true)
            .tty(false);

        let mut attached = self
            .pods(namespace)
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(ClusterError::from_kube)?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (stdout, stderr) = tokio::join!(read_stream(stdout), read_stream(stderr));
        let status = match status {
            Some(status) => status.await,
            None => None,
        };

        attached
            .join()
            .await
            .map_err(|e| ClusterError::Other(format!("exec stream failed: {e}")))?;

        let exit_code = exit_code_from_status(status.as_ref())?;
        debug!(pod = %pod, exit_code, "Remote command finished");

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

async fn read_stream<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!(error = %e, "Exec stream closed early");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Extract the exit code from the status frame of an exec stream
///
/// The API server reports a non-zero exit as a `Failure` status with reason
/// `NonZeroExitCode` and the code in an `ExitCode` cause. Any other failure is
/// an execution error rather than a command result.
pub fn exit_code_from_status(status: Option<&Status>) -> Result<i32, ClusterError> {
    let Some(status) = status else {
        return Ok(0);
    };

    match status.status.as_deref() {
        Some("Success") | None => Ok(0),
        _ if status.reason.as_deref() == Some("NonZeroExitCode") => status
            .details
            .as_ref()
            .and_then(|details| details.causes.as_ref())
            .and_then(|causes| {
                causes
                    .iter()
                    .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
            })
            .and_then(|cause| cause.message.as_deref())
            .and_then(|code| code.trim().parse().ok())
            .ok_or_else(|| {
                ClusterError::Other("exec status reported a non-zero exit without a code".into())
            }),
        _ => Err(ClusterError::Other(
            status
                .message
                .clone()
                .unwrap_or_else(|| "exec failed without a message".to_string()),
        )),
    }
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())])
}

/// Render a [`SandboxSpec`] as a privileged, node-pinned pod
pub fn build_pod(spec: &SandboxSpec) -> Pod {
    let cpu = |value: &str| BTreeMap::from([("cpu".to_string(), Quantity(value.to_string()))]);

    let container = Container {
        name: spec.container.clone(),
        image: Some(spec.image.clone()),
        command: Some(spec.command.clone()),
        resources: Some(ResourceRequirements {
            requests: Some(cpu(&spec.cpu_request)),
            limits: Some(cpu(&spec.cpu_limit)),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            capabilities: Some(Capabilities {
                add: Some(spec.capabilities.clone()),
                drop: None,
            }),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: BPFFS_VOLUME.to_string(),
            mount_path: spec.host_path.clone(),
            read_only: Some(true),
            mount_propagation: Some("HostToContainer".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(spec.node_name.clone()),
            containers: vec![container],
            volumes: Some(vec![Volume {
                name: BPFFS_VOLUME.to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: spec.host_path.clone(),
                    type_: None,
                }),
                ..Default::default()
            }]),
            tolerations: Some(vec![Toleration {
                operator: Some("Exists".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
