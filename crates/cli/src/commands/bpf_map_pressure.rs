//! `bpf-map-pressure` command

use anyhow::Result;
use inspector_lib::ScanProfile;

use super::{run_scan, ScanOptions};

pub const LONG_ABOUT: &str = "\
Analyze cluster nodes to identify BPF map pressure by checking core BPF maps under /sys/fs/bpf/tc/globals.

This command checks the usage of core BPF maps used by Cilium. It shows the
current usage and maximum capacity of each map, helping identify potential
pressure points in the BPF map system.

Examples:
  # Check BPF map pressure across all nodes
  kubectl cilium bpf-map-pressure

  # Check BPF map pressure for a specific node
  kubectl cilium bpf-map-pressure --nodename=node-1";

const PROMPT: &str = "This command creates inspector pods on all nodes to check BPF map pressure. \
It may consume CPU resources (200m core limit per pod).\nDo you want to continue?";

pub async fn run(options: &ScanOptions) -> Result<()> {
    run_scan(ScanProfile::bpf_map_pressure(), PROMPT, options).await
}
