//! kubectl-cilium
//!
//! A kubectl plugin that inspects Cilium's BPF maps on every node and
//! reports which ones are close to capacity.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{bpf_map_pressure, snat_eviction, ScanOptions};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Diagnostic tool for Cilium
#[derive(Parser)]
#[command(name = "kubectl-cilium", bin_name = "kubectl cilium")]
#[command(author, version, about = "Diagnostic tool for Cilium", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file
    #[arg(long, short = 'k', global = true)]
    pub kubeconfig: Option<String>,

    /// Only inspect the node with this name
    #[arg(long, short = 'n', global = true)]
    pub nodename: Option<String>,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Number of nodes inspected concurrently
    #[arg(long, global = true)]
    pub pool_size: Option<usize>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check BPF map pressure across all nodes
    #[command(long_about = bpf_map_pressure::LONG_ABOUT)]
    BpfMapPressure,

    /// Check for SNAT map eviction risk on each cilium-agent
    #[command(long_about = snat_eviction::LONG_ABOUT)]
    SnatEviction,
}

/// Scan progress is shown by default, engine internals only with `--verbose`
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,inspector_lib=debug,kubectl_cilium=debug"
    } else {
        "warn,inspector_lib=info,kubectl_cilium=info"
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let options = ScanOptions {
        kubeconfig: cli.kubeconfig,
        nodename: cli.nodename,
        assume_yes: cli.yes,
        pool_size: cli.pool_size,
        format: cli.format,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::BpfMapPressure => bpf_map_pressure::run(&options).await?,
        Commands::SnatEviction => snat_eviction::run(&options).await?,
    }

    Ok(())
}
