//! Structured logging for scan events
//!
//! Every significant lifecycle step of a scan is emitted as a `tracing`
//! event with an `event` field, so runs can be followed in JSON logs.

use tracing::{debug, info, warn};

/// Structured logger for scan events
#[derive(Debug, Clone)]
pub struct ScanLogger {
    profile: String,
}

impl ScanLogger {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Log the start of a scan
    pub fn log_scan_started(&self, targets: usize, pool_size: usize) {
        info!(
            event = "scan_started",
            profile = %self.profile,
            targets = targets,
            pool_size = pool_size,
            "Starting scan"
        );
    }

    pub fn log_target_started(&self, target: &str) {
        info!(
            event = "target_started",
            profile = %self.profile,
            target = %target,
            "Inspecting node"
        );
    }

    /// Log a sandbox declaration
    pub fn log_sandbox_created(&self, target: &str, sandbox: &str, reused: bool) {
        info!(
            event = "sandbox_created",
            profile = %self.profile,
            target = %target,
            sandbox = %sandbox,
            reused = reused,
            "Created inspector pod"
        );
    }

    pub fn log_sandbox_deleted(&self, sandbox: &str) {
        debug!(
            event = "sandbox_deleted",
            profile = %self.profile,
            sandbox = %sandbox,
            "Deleted inspector pod"
        );
    }

    /// Log a target whose sandbox could not be acquired
    pub fn log_target_unavailable(&self, target: &str, error: &str) {
        warn!(
            event = "target_unavailable",
            profile = %self.profile,
            target = %target,
            error = %error,
            "Failed to prepare target for inspection"
        );
    }

    pub fn log_probe_failed(&self, target: &str, metric: &str, error: &str) {
        warn!(
            event = "probe_failed",
            profile = %self.profile,
            target = %target,
            metric = %metric,
            error = %error,
            "Probe failed"
        );
    }

    /// Log the completion of one target
    pub fn log_target_inspected(&self, target: &str, measured: usize, failed: usize) {
        info!(
            event = "target_inspected",
            profile = %self.profile,
            target = %target,
            measured = measured,
            failed = failed,
            "Inspected target"
        );
    }

    pub fn log_cleanup_started(&self, interrupted: bool, sandboxes: usize) {
        if interrupted {
            warn!(
                event = "cleanup_started",
                profile = %self.profile,
                interrupted = true,
                sandboxes = sandboxes,
                "Interrupted, cleaning up inspector pods"
            );
        } else {
            info!(
                event = "cleanup_started",
                profile = %self.profile,
                interrupted = false,
                sandboxes = sandboxes,
                "Scan finished, cleaning up"
            );
        }
    }

    pub fn log_cleanup_finished(&self, namespace_deleted: bool) {
        info!(
            event = "cleanup_finished",
            profile = %self.profile,
            namespace_deleted = namespace_deleted,
            "Cleanup finished"
        );
    }
}
