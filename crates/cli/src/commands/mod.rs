//! Scan subcommands

pub mod bpf_map_pressure;
pub mod snat_eviction;

use anyhow::{Context, Result};
use inspector_lib::{Inspector, KubeCluster, ScanProfile};
use std::sync::Arc;
use tracing::info;

use crate::config::{inspector_config, kubeconfig_path};
use crate::output::{confirm, print_summary, OutputFormat};

/// Flags shared by every scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub kubeconfig: Option<String>,
    pub nodename: Option<String>,
    pub assume_yes: bool,
    pub pool_size: Option<usize>,
    pub format: OutputFormat,
    pub verbose: bool,
}

/// Confirm, connect and run `profile` to completion
pub async fn run_scan(profile: ScanProfile, prompt: &str, options: &ScanOptions) -> Result<()> {
    if !confirm(prompt, options.assume_yes)? {
        println!("Aborted.");
        return Ok(());
    }

    let config = inspector_config(options.pool_size)?;
    let kubeconfig = kubeconfig_path(options.kubeconfig.as_deref());
    info!(kubeconfig = ?kubeconfig, profile = %profile.name, "Connecting to cluster");

    let cluster = KubeCluster::from_kubeconfig(kubeconfig.as_deref())
        .await
        .context("failed to create kubernetes client")?;

    let name = profile.name.clone();
    let inspector = Inspector::for_profile(Arc::new(cluster), profile, config);

    let mut stdout = std::io::stdout();
    let summary = inspector
        .run(options.nodename.as_deref(), options.format.into(), &mut stdout)
        .await
        .with_context(|| format!("{name} failed"))?;

    if options.verbose {
        print_summary(&summary);
    }
    Ok(())
}
