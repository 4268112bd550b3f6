//! Inspector configuration

use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::models::DEFAULT_WARNING_RATIO;

/// Tunables shared by every scan profile
///
/// Values come from `INSPECTOR_*` environment variables, falling back to
/// the defaults below. CLI flags are applied on top by the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Number of targets inspected concurrently
    pub pool_size: usize,

    /// Timeout for individual Kubernetes API calls and sandbox readiness
    pub k8s_timeout_secs: u64,

    /// Interval between sandbox phase checks
    pub ready_poll_interval_secs: u64,

    /// Interval between remaining-sandbox checks during cleanup
    pub cleanup_poll_interval_secs: u64,

    /// Usage ratio at or above which a metric is reported as a warning
    pub warning_ratio: f64,

    /// Overrides the profile's per-command timeout
    pub exec_timeout_secs: Option<u64>,

    /// Image for ephemeral inspector pods
    pub image: String,

    /// CPU limit for ephemeral inspector pods
    pub cpu_limit: String,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            k8s_timeout_secs: 60,
            ready_poll_interval_secs: 2,
            cleanup_poll_interval_secs: 5,
            warning_ratio: DEFAULT_WARNING_RATIO,
            exec_timeout_secs: None,
            image: "gyutaeb/bpftool:v7.5.0".to_string(),
            cpu_limit: "200m".to_string(),
        }
    }
}

impl InspectorConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("INSPECTOR"))
            .build()?;

        let config: Self = config.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring invalid INSPECTOR_* settings");
            Self::default()
        });
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            bail!("pool size must be at least 1");
        }
        if !(self.warning_ratio > 0.0 && self.warning_ratio <= 1.0) {
            bail!(
                "warning ratio must be in (0, 1], got {}",
                self.warning_ratio
            );
        }
        if self.ready_poll_interval_secs == 0 || self.cleanup_poll_interval_secs == 0 {
            bail!("poll intervals must be at least one second");
        }
        Ok(())
    }

    pub fn k8s_timeout(&self) -> Duration {
        Duration::from_secs(self.k8s_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_secs(self.ready_poll_interval_secs)
    }

    pub fn cleanup_poll_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_poll_interval_secs)
    }

    /// Per-command timeout, preferring the configured override
    pub fn exec_timeout(&self, profile_default: Duration) -> Duration {
        self.exec_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(profile_default)
    }
}
