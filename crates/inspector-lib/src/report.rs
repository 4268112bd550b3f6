//! Report rendering

use crate::aggregator::ClassifiedRows;
use crate::models::{Classification, Outcome, ReportRow};
use colored::Colorize;
use std::io::{self, Write};
use tabled::builder::Builder;
use tabled::settings::{Padding, Style};

/// Which row field fills the probe-source column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceColumn {
    /// The metric name, for profiles with several metrics per target
    Metric,
    /// The process the probes ran in, for single-metric profiles
    Process,
}

/// Column headers and advisory text for one scan profile
#[derive(Debug, Clone)]
pub struct ReportLayout {
    pub target_header: String,
    pub source_header: String,
    pub usage_header: String,
    pub source: SourceColumn,
    /// Printed after the table when any row is a warning
    pub hint: Option<String>,
}

impl ReportLayout {
    fn source_cell(&self, row: &ReportRow) -> String {
        let value = match self.source {
            SourceColumn::Metric => row.metric.as_deref(),
            SourceColumn::Process => row.process.as_deref(),
        };
        value.unwrap_or("-").to_string()
    }

    fn headers(&self) -> [String; 5] {
        [
            "STATUS".to_string(),
            self.target_header.clone(),
            self.source_header.clone(),
            self.usage_header.clone(),
            "CURRENT/MAX".to_string(),
        ]
    }

    fn cells(&self, row: &ReportRow) -> [String; 5] {
        let (usage, counts) = match &row.outcome {
            Outcome::Measured { current, capacity } => (
                row.usage()
                    .map(|u| format!("{u:.2}%"))
                    .unwrap_or_else(|| "-".to_string()),
                format!("{current}/{capacity}"),
            ),
            Outcome::Failed { error } => (format!("ERR:{error}"), String::new()),
        };

        [
            row.status.to_string(),
            row.target.clone(),
            self.source_cell(row),
            usage,
            counts,
        ]
    }
}

/// Output encoding of a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Write the classified rows in render order
pub fn render(
    rows: &ClassifiedRows,
    layout: &ReportLayout,
    format: OutputFormat,
    out: &mut dyn Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Table => render_table(rows, layout, out),
        OutputFormat::Json => {
            let rows: Vec<&ReportRow> = rows.iter().collect();
            serde_json::to_writer_pretty(&mut *out, &rows)?;
            writeln!(out)
        }
    }
}

fn render_table(
    rows: &ClassifiedRows,
    layout: &ReportLayout,
    out: &mut dyn Write,
) -> io::Result<()> {
    let mut builder = Builder::default();
    builder.push_record(layout.headers());
    for row in rows.iter() {
        builder.push_record(layout.cells(row));
    }

    let mut table = builder.build();
    table.with(Style::blank()).with(Padding::new(0, 3, 0, 0));

    writeln!(out)?;
    writeln!(out, "{table}")?;

    let has_warning = rows.iter().any(|r| r.status == Classification::Warning);
    if let Some(hint) = layout.hint.as_deref().filter(|_| has_warning) {
        writeln!(out)?;
        writeln!(out, "{}", hint.truecolor(255, 135, 0))?;
        writeln!(out)?;
    }
    Ok(())
}
