//! Core data models for the inspection engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// A node to inspect, optionally with the agent pod already running on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub process: Option<String>,
}

impl Target {
    pub fn node(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            process: None,
        }
    }

    pub fn with_process(name: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            process: Some(process.into()),
        }
    }
}

/// Lifecycle phase of a sandbox pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxPhase {
    Pending,
    Running,
    Failed,
    Unknown,
}

impl SandboxPhase {
    /// Map a Kubernetes pod phase; a pod that ran to completion is unusable
    pub fn from_pod_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => SandboxPhase::Pending,
            Some("Running") => SandboxPhase::Running,
            Some("Failed") | Some("Succeeded") => SandboxPhase::Failed,
            _ => SandboxPhase::Unknown,
        }
    }
}

/// An execution environment bound to one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    pub name: String,
    pub namespace: String,
    pub container: String,
    pub target: String,
    pub phase: SandboxPhase,
}

/// Severity bucket for a report row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Warning,
    Ok,
    Unknown,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Warning => write!(f, "[Warning]"),
            Classification::Ok => write!(f, "[O.K.]"),
            Classification::Unknown => write!(f, "[Unknown]"),
        }
    }
}

/// Default usage ratio at or above which a metric is a warning
pub const DEFAULT_WARNING_RATIO: f64 = 0.8;

/// Classify a measurement against its capacity
///
/// A missing or zero capacity has no defined usage and is `Unknown`.
pub fn classify(current: u64, capacity: Option<u64>, warning_ratio: f64) -> Classification {
    match capacity {
        Some(capacity) if capacity > 0 => {
            if current as f64 >= capacity as f64 * warning_ratio {
                Classification::Warning
            } else {
                Classification::Ok
            }
        }
        _ => Classification::Unknown,
    }
}

/// Result of probing one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum Outcome {
    Measured { current: u64, capacity: u64 },
    Failed { error: String },
}

impl Outcome {
    /// Usage as a percentage of capacity
    pub fn usage(&self) -> Option<f64> {
        match self {
            Outcome::Measured { current, capacity } if *capacity > 0 => {
                Some(*current as f64 / *capacity as f64 * 100.0)
            }
            _ => None,
        }
    }

    pub fn classify(&self, warning_ratio: f64) -> Classification {
        match self {
            Outcome::Measured { current, capacity } => {
                classify(*current, Some(*capacity), warning_ratio)
            }
            Outcome::Failed { .. } => Classification::Unknown,
        }
    }
}

/// One probe result for a (target, metric) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric: String,
    pub outcome: Outcome,
}

impl MetricSample {
    pub fn measured(metric: impl Into<String>, current: u64, capacity: u64) -> Self {
        Self {
            metric: metric.into(),
            outcome: Outcome::Measured { current, capacity },
        }
    }

    pub fn failed(metric: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            metric: metric.into(),
            outcome: Outcome::Failed {
                error: error.to_string(),
            },
        }
    }
}

/// Everything learned about one target during a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: String,
    pub process: Option<String>,
    pub samples: Vec<MetricSample>,
    /// Set when no sandbox could be acquired for the target
    pub error: Option<String>,
}

impl TargetReport {
    pub fn measured(target: &Target, samples: Vec<MetricSample>) -> Self {
        Self {
            target: target.name.clone(),
            process: target.process.clone(),
            samples,
            error: None,
        }
    }

    pub fn unavailable(target: &Target, error: impl fmt::Display) -> Self {
        Self {
            target: target.name.clone(),
            process: target.process.clone(),
            samples: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// A classified row of the final report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub status: Classification,
    pub target: String,
    pub process: Option<String>,
    pub metric: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ReportRow {
    pub fn usage(&self) -> Option<f64> {
        self.outcome.usage()
    }
}
