//! Classified result collection
//!
//! Workers record finished [`TargetReport`]s concurrently. Each row is
//! classified once on insert and appended to one of three buckets, each
//! behind its own lock, so recording a warning never waits on an OK row.

use crate::models::{Classification, Outcome, ReportRow, TargetReport};
use serde::Serialize;
use tokio::sync::Mutex;

/// Append-only Warning / OK / Unknown buckets shared by all workers
#[derive(Debug)]
pub struct ResultSet {
    warning_ratio: f64,
    warning: Mutex<Vec<ReportRow>>,
    ok: Mutex<Vec<ReportRow>>,
    unknown: Mutex<Vec<ReportRow>>,
}

/// Rows in render order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassifiedRows {
    pub warning: Vec<ReportRow>,
    pub ok: Vec<ReportRow>,
    pub unknown: Vec<ReportRow>,
}

impl ClassifiedRows {
    /// Warning, then OK, then Unknown
    pub fn iter(&self) -> impl Iterator<Item = &ReportRow> {
        self.warning
            .iter()
            .chain(self.ok.iter())
            .chain(self.unknown.iter())
    }

    pub fn len(&self) -> usize {
        self.warning.len() + self.ok.len() + self.unknown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSet {
    pub fn new(warning_ratio: f64) -> Self {
        Self {
            warning_ratio,
            warning: Mutex::new(Vec::new()),
            ok: Mutex::new(Vec::new()),
            unknown: Mutex::new(Vec::new()),
        }
    }

    fn bucket(&self, status: Classification) -> &Mutex<Vec<ReportRow>> {
        match status {
            Classification::Warning => &self.warning,
            Classification::Ok => &self.ok,
            Classification::Unknown => &self.unknown,
        }
    }

    async fn push(&self, row: ReportRow) {
        self.bucket(row.status).lock().await.push(row);
    }

    /// Classify and store every row of a finished target
    pub async fn record(&self, report: TargetReport) {
        if let Some(error) = report.error {
            self.push(ReportRow {
                status: Classification::Unknown,
                target: report.target,
                process: report.process,
                metric: None,
                outcome: Outcome::Failed { error },
            })
            .await;
            return;
        }

        for sample in report.samples {
            let status = sample.outcome.classify(self.warning_ratio);
            self.push(ReportRow {
                status,
                target: report.target.clone(),
                process: report.process.clone(),
                metric: Some(sample.metric),
                outcome: sample.outcome,
            })
            .await;
        }
    }

    /// Snapshot all rows, sorting Warning and OK by usage descending
    ///
    /// Unknown rows keep their insertion order.
    pub async fn classified(&self) -> ClassifiedRows {
        let by_usage_desc = |a: &ReportRow, b: &ReportRow| {
            let a = a.usage().unwrap_or(0.0);
            let b = b.usage().unwrap_or(0.0);
            b.total_cmp(&a)
        };

        let mut warning = self.warning.lock().await.clone();
        let mut ok = self.ok.lock().await.clone();
        let unknown = self.unknown.lock().await.clone();
        warning.sort_by(by_usage_desc);
        ok.sort_by(by_usage_desc);

        ClassifiedRows {
            warning,
            ok,
            unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricSample, Target};
    use std::sync::Arc;

    fn usages(rows: &[ReportRow]) -> Vec<String> {
        rows.iter()
            .map(|r| format!("{:.0}", r.usage().unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_rows_land_in_one_bucket() {
        let results = ResultSet::new(0.8);
        results
            .record(TargetReport::measured(
                &Target::node("node-1"),
                vec![
                    MetricSample::measured("cilium_ct4_global", 820, 1000),
                    MetricSample::measured("cilium_ct6_global", 100, 1000),
                    MetricSample::failed("cilium_snat_v4_external", "exit code 2"),
                ],
            ))
            .await;

        let rows = results.classified().await;
        assert_eq!(rows.warning.len(), 1);
        assert_eq!(rows.ok.len(), 1);
        assert_eq!(rows.unknown.len(), 1);
        assert_eq!(rows.warning[0].metric.as_deref(), Some("cilium_ct4_global"));
        assert_eq!(rows.unknown[0].status, Classification::Unknown);
    }

    #[tokio::test]
    async fn test_unavailable_target_is_single_unknown_row() {
        let results = ResultSet::new(0.8);
        results
            .record(TargetReport::unavailable(
                &Target::node("node-3"),
                "sandbox did not become ready",
            ))
            .await;

        let rows = results.classified().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.unknown[0].target, "node-3");
        assert!(rows.unknown[0].metric.is_none());
    }

    #[tokio::test]
    async fn test_sorted_by_usage_descending() {
        let results = ResultSet::new(0.8);
        for (node, current) in [("a", 55u64), ("b", 90), ("c", 81), ("d", 10), ("e", 30)] {
            results
                .record(TargetReport::measured(
                    &Target::node(node),
                    vec![MetricSample::measured("m", current, 100)],
                ))
                .await;
        }

        let rows = results.classified().await;
        assert_eq!(usages(&rows.warning), vec!["90", "81"]);
        assert_eq!(usages(&rows.ok), vec!["55", "30", "10"]);

        let order: Vec<&str> = rows.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a", "e", "d"]);
    }

    #[tokio::test]
    async fn test_warning_rows_ordered_with_lower_threshold() {
        let results = ResultSet::new(0.5);
        for current in [55u64, 90, 81] {
            results
                .record(TargetReport::measured(
                    &Target::node(format!("node-{current}")),
                    vec![MetricSample::measured("m", current, 100)],
                ))
                .await;
        }

        let rows = results.classified().await;
        assert_eq!(usages(&rows.warning), vec!["90", "81", "55"]);
    }

    #[tokio::test]
    async fn test_unknown_keeps_insertion_order() {
        let results = ResultSet::new(0.8);
        for node in ["z", "a", "m"] {
            results
                .record(TargetReport::unavailable(&Target::node(node), "boom"))
                .await;
        }

        let rows = results.classified().await;
        let order: Vec<&str> = rows.unknown.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(order, vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_all_kept() {
        let results = Arc::new(ResultSet::new(0.8));
        let mut handles = Vec::new();
        for i in 0..50u64 {
            let results = results.clone();
            handles.push(tokio::spawn(async move {
                results
                    .record(TargetReport::measured(
                        &Target::node(format!("node-{i}")),
                        vec![MetricSample::measured("m", i * 2, 100)],
                    ))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let rows = results.classified().await;
        assert_eq!(rows.len(), 50);
        // 80..=98 step 2
        assert_eq!(rows.warning.len(), 10);
        assert_eq!(rows.ok.len(), 40);
    }
}
