//! Metric probes
//!
//! A metric is measured with up to three commands run in order: an optional
//! existence check, a capacity probe and a current-count probe. Each count
//! probe must print a single non-negative integer.

use crate::error::{ExecError, ProbeError};
use crate::exec::RemoteExecutor;
use crate::models::{MetricSample, Sandbox};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Directory where Cilium pins its global BPF maps
pub const GLOBALS_DIR: &str = "/sys/fs/bpf/tc/globals";

/// Commands that measure one metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricProbe {
    pub name: String,
    /// Exits 0 when the metric applies to the target, 1 when it does not
    pub existence: Option<Vec<String>>,
    pub capacity: Vec<String>,
    pub current: Vec<String>,
}

fn shell(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

impl MetricProbe {
    /// Probe a BPF map pinned under `dir`
    pub fn pinned_map(dir: &str, map: &str) -> Self {
        let path = format!("{dir}/{map}");
        Self {
            name: map.to_string(),
            existence: Some(shell(format!("[ -f {path} ]"))),
            capacity: shell(format!(
                "bpftool map show pinned {path} | grep -o 'max_entries [0-9]\\+' | awk '{{print $2}}'"
            )),
            current: shell(format!(
                "bpftool map dump pinned {path} | grep elements | awk '{{print $2}}'"
            )),
        }
    }

    /// Measure unconditionally, for maps every target is expected to have
    pub fn without_existence_check(mut self) -> Self {
        self.existence = None;
        self
    }
}

/// Parse a probe's output as a non-negative count
pub fn parse_count(output: &str) -> Result<u64, ProbeError> {
    let trimmed = output.trim();
    trimmed.parse().map_err(|source| ProbeError::Parse {
        output: trimmed.to_string(),
        source,
    })
}

/// Runs probes inside one sandbox
pub struct ProbeRunner<'a> {
    executor: &'a RemoteExecutor,
    sandbox: &'a Sandbox,
    timeout: Duration,
    cancel: &'a CancellationToken,
}

impl<'a> ProbeRunner<'a> {
    pub fn new(
        executor: &'a RemoteExecutor,
        sandbox: &'a Sandbox,
        timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            executor,
            sandbox,
            timeout,
            cancel,
        }
    }

    async fn run(&self, command: &[String]) -> Result<String, ExecError> {
        self.executor
            .exec(self.sandbox, command, self.timeout, self.cancel)
            .await
    }

    /// Whether the metric's backing resource exists on this target
    ///
    /// Only exit code 1 means absent; any other failure is returned.
    pub async fn is_applicable(&self, probe: &MetricProbe) -> Result<bool, ExecError> {
        let Some(command) = &probe.existence else {
            return Ok(true);
        };

        match self.run(command).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_absent() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn count(&self, command: &[String]) -> Result<u64, ProbeError> {
        let output = self.run(command).await?;
        parse_count(&output)
    }

    /// Read capacity then current count
    pub async fn measure(&self, probe: &MetricProbe) -> Result<(u64, u64), ProbeError> {
        let capacity = self.count(&probe.capacity).await?;
        if capacity == 0 {
            return Err(ProbeError::ZeroCapacity);
        }
        let current = self.count(&probe.current).await?;
        Ok((current, capacity))
    }

    /// Run the full pipeline for one metric
    ///
    /// Returns `None` when the metric does not apply to this target.
    pub async fn sample(&self, probe: &MetricProbe) -> Option<MetricSample> {
        match self.is_applicable(probe).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => return Some(MetricSample::failed(&probe.name, e)),
        }

        Some(match self.measure(probe).await {
            Ok((current, capacity)) => MetricSample::measured(&probe.name, current, capacity),
            Err(e) => MetricSample::failed(&probe.name, e),
        })
    }
}
