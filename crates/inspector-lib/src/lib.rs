//! Cluster-wide BPF map inspection engine
//!
//! This crate provides the core functionality for:
//! - Target discovery and bounded fan-out across nodes
//! - Ephemeral privileged sandboxes and remote command execution
//! - Metric probes and severity classification
//! - Guaranteed cleanup on interrupt
//! - Report rendering and structured logging

pub mod aggregator;
pub mod cluster;
pub mod config;
pub mod error;
pub mod exec;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod probe;
pub mod profile;
pub mod report;
pub mod sandbox;
pub mod shutdown;

pub use aggregator::{ClassifiedRows, ResultSet};
pub use cluster::{ClusterClient, KubeCluster};
pub use config::InspectorConfig;
pub use error::{ClusterError, ExecError, ProbeError, RunError, SandboxError};
pub use models::*;
pub use observability::ScanLogger;
pub use orchestrator::{Inspector, ScanSummary};
pub use profile::ScanProfile;
pub use report::{OutputFormat, ReportLayout};
pub use shutdown::{shutdown_signal, CoordinatorState};
