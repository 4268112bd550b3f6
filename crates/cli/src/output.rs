//! Output formatting utilities

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use inspector_lib::ScanSummary;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl From<OutputFormat> for inspector_lib::OutputFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Table => inspector_lib::OutputFormat::Table,
            OutputFormat::Json => inspector_lib::OutputFormat::Json,
        }
    }
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue().bold(), message);
}

/// Ask the operator to confirm, unless `assume_yes` is set
pub fn confirm(message: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    inquire::Confirm::new(message)
        .with_default(false)
        .prompt()
        .context("failed to read confirmation")
}

/// Print a one-line summary of a finished scan
pub fn print_summary(summary: &ScanSummary) {
    let elapsed = summary.finished_at - summary.started_at;
    let line = format!(
        "Inspected {} target(s) in {}s: {} warning, {} ok, {} unknown",
        summary.targets,
        elapsed.num_seconds(),
        summary.warnings,
        summary.ok,
        summary.unknown,
    );

    if summary.interrupted {
        print_warning(&format!("Interrupted. {line}"));
    } else {
        print_info(&line);
    }
}
