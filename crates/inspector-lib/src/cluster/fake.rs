//! In-memory cluster used by engine tests
//!
//! Probe commands are answered by inspecting the shell script text: an
//! existence check (`[ -f`), a capacity probe (`map show`) or a current-count
//! probe (`map dump`) for whichever configured map name appears in it.

use super::{ClusterClient, ExecOutput, PodSummary, SandboxSpec};
use crate::error::ClusterError;
use crate::models::SandboxPhase;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

/// Raw probe output for one map on one node
#[derive(Debug, Clone)]
pub struct FakeMap {
    pub capacity: String,
    pub current: String,
}

/// How a node behaves when inspected
#[derive(Debug, Clone, Default)]
pub struct FakeNode {
    pub never_ready: bool,
    pub hang_exec: bool,
    pub exists_error: bool,
    pub exec_delay: Option<Duration>,
    pub phase_delay: Option<Duration>,
    pub maps: BTreeMap<String, FakeMap>,
}

impl FakeNode {
    pub fn ready() -> Self {
        Self::default()
    }

    pub fn never_ready() -> Self {
        Self {
            never_ready: true,
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang_exec: true,
            ..Self::default()
        }
    }

    pub fn with_map(self, map: &str, current: u64, capacity: u64) -> Self {
        self.with_raw_map(map, &current.to_string(), &capacity.to_string())
    }

    pub fn with_raw_map(mut self, map: &str, current: &str, capacity: &str) -> Self {
        self.maps.insert(
            map.to_string(),
            FakeMap {
                capacity: capacity.to_string(),
                current: current.to_string(),
            },
        );
        self
    }

    pub fn with_exists_error(mut self) -> Self {
        self.exists_error = true;
        self
    }

    /// Every exec on this node takes `delay` before answering
    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = Some(delay);
        self
    }

    /// Every phase lookup on this node takes `delay` before answering
    pub fn with_phase_delay(mut self, delay: Duration) -> Self {
        self.phase_delay = Some(delay);
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    namespaces: BTreeSet<String>,
    /// (namespace, pod) -> node
    pods: BTreeMap<(String, String), String>,
    pods_created: Vec<String>,
    pod_deletes: usize,
    namespace_deletes: usize,
    exec_calls: Vec<(String, String)>,
    execs_in_flight: usize,
    max_execs_in_flight: usize,
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    nodes: BTreeMap<String, FakeNode>,
    /// Pre-existing agent pods: namespace -> pods
    agent_pods: HashMap<String, Vec<PodSummary>>,
    fail_list: bool,
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, name: &str, node: FakeNode) -> Self {
        self.nodes.insert(name.to_string(), node);
        self
    }

    /// Register an agent pod already running on `node`
    pub fn with_agent_pod(mut self, namespace: &str, pod: &str, node: &str) -> Self {
        self.agent_pods
            .entry(namespace.to_string())
            .or_default()
            .push(PodSummary {
                name: pod.to_string(),
                node_name: Some(node.to_string()),
            });
        self.state
            .get_mut()
            .expect("fake state poisoned")
            .pods
            .insert((namespace.to_string(), pod.to_string()), node.to_string());
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state poisoned")
    }

    pub fn pods_created(&self) -> Vec<String> {
        self.state().pods_created.clone()
    }

    pub fn live_pods(&self, namespace: &str) -> Vec<String> {
        self.state()
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, pod)| pod.clone())
            .collect()
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.state().namespaces.contains(namespace)
    }

    pub fn pod_deletes(&self) -> usize {
        self.state().pod_deletes
    }

    pub fn namespace_deletes(&self) -> usize {
        self.state().namespace_deletes
    }

    pub fn exec_calls(&self) -> Vec<(String, String)> {
        self.state().exec_calls.clone()
    }

    /// Highest number of delayed execs observed running at once
    pub fn max_execs_in_flight(&self) -> usize {
        self.state().max_execs_in_flight
    }

    fn node_of(&self, namespace: &str, pod: &str) -> Option<String> {
        self.state()
            .pods
            .get(&(namespace.to_string(), pod.to_string()))
            .cloned()
    }
}

fn exited(code: i32, stdout: &str, stderr: &str) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code: code,
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<String>, ClusterError> {
        if self.fail_list {
            return Err(ClusterError::Other("connection refused".into()));
        }
        Ok(self.nodes.keys().cloned().collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<PodSummary>, ClusterError> {
        if self.fail_list {
            return Err(ClusterError::Other("connection refused".into()));
        }
        if label_selector.is_some() {
            return Ok(self.agent_pods.get(namespace).cloned().unwrap_or_default());
        }
        let state = self.state();
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((_, pod), node)| PodSummary {
                name: pod.clone(),
                node_name: Some(node.clone()),
            })
            .collect())
    }

    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError> {
        if self.state().namespaces.insert(name.to_string()) {
            Ok(())
        } else {
            Err(ClusterError::AlreadyExists(name.to_string()))
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        state.namespace_deletes += 1;
        if !state.namespaces.remove(name) {
            return Err(ClusterError::NotFound(name.to_string()));
        }
        state.pods.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn create_pod(&self, spec: &SandboxSpec) -> Result<(), ClusterError> {
        let mut state = self.state();
        if !state.namespaces.contains(&spec.namespace) {
            return Err(ClusterError::NotFound(spec.namespace.clone()));
        }
        let key = (spec.namespace.clone(), spec.name.clone());
        if state.pods.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(spec.name.clone()));
        }
        state.pods.insert(key, spec.node_name.clone());
        state.pods_created.push(spec.name.clone());
        Ok(())
    }

    async fn pod_phase(&self, namespace: &str, name: &str) -> Result<SandboxPhase, ClusterError> {
        let node = self
            .node_of(namespace, name)
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))?;
        let behaviour = self.nodes.get(&node).cloned().unwrap_or_default();
        if let Some(delay) = behaviour.phase_delay {
            tokio::time::sleep(delay).await;
        }
        if behaviour.never_ready {
            Ok(SandboxPhase::Pending)
        } else {
            Ok(SandboxPhase::Running)
        }
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        state.pod_deletes += 1;
        match state.pods.remove(&(namespace.to_string(), name.to_string())) {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound(name.to_string())),
        }
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        _container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError> {
        let node = self
            .node_of(namespace, pod)
            .ok_or_else(|| ClusterError::NotFound(pod.to_string()))?;
        let script = command.last().cloned().unwrap_or_default();
        self.state().exec_calls.push((node.clone(), script.clone()));

        let behaviour = self.nodes.get(&node).cloned().unwrap_or_default();
        if behaviour.hang_exec {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = behaviour.exec_delay {
            {
                let mut state = self.state();
                state.execs_in_flight += 1;
                state.max_execs_in_flight = state.max_execs_in_flight.max(state.execs_in_flight);
            }
            tokio::time::sleep(delay).await;
            self.state().execs_in_flight -= 1;
        }

        let map = behaviour
            .maps
            .iter()
            .find(|(name, _)| script.contains(&format!("/{name}")));

        if script.starts_with("[ -f") {
            if behaviour.exists_error {
                return Ok(exited(126, "", "permission denied"));
            }
            return Ok(match map {
                Some(_) => exited(0, "", ""),
                None => exited(1, "", ""),
            });
        }

        match map {
            Some((_, stats)) if script.contains("map show") => Ok(exited(0, &stats.capacity, "")),
            Some((_, stats)) if script.contains("map dump") => Ok(exited(0, &stats.current, "")),
            _ => Ok(exited(
                1,
                "",
                "Error: bpf obj get (/sys/fs/bpf/tc/globals): No such file or directory",
            )),
        }
    }
}
