//! `snat-eviction` command

use anyhow::Result;
use inspector_lib::ScanProfile;

use super::{run_scan, ScanOptions};

pub const LONG_ABOUT: &str = "\
Check every cilium-agent for conditions that lead to high SNAT map eviction rates.

This command checks for conditions that could lead to SNAT map high eviction
rates, such as a large number of active connections. If any nodes are
identified as being at risk, it is recommended to drain and reboot them.

For more details, please refer to: https://github.com/cilium/cilium/pull/37747

Examples:
  # Check for SNAT eviction risks across all nodes
  kubectl cilium snat-eviction";

const PROMPT: &str = "Do you want to continue?";

pub async fn run(options: &ScanOptions) -> Result<()> {
    run_scan(ScanProfile::snat_eviction(), PROMPT, options).await
}
