//! JSON export functionality

use std::fs::File;
use std::path::Path;

use anyhow::Result;
use rest_bench_core::{AggregatedRow, AggregationReport};
use serde_json::{json, Value};

/// Rows with derived columns, the summary and the skipped directories
pub struct JsonExporter;

impl JsonExporter {
    /// Export the report to a JSON file
    pub fn export(report: &AggregationReport, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &Self::to_value(report))?;
        Ok(())
    }

    /// Build the JSON document; unreported values are `null`
    pub fn to_value(report: &AggregationReport) -> Value {
        let rows: Vec<Value> = report.rows.iter().map(row_value).collect();
        let summary = &report.summary;

        json!({
            "summary": {
                "rows": summary.rows,
                "skipped": summary.skipped,
                "total_tests": summary.total_tests,
                "total_failed": summary.total_failed,
                "total_tokens": summary.total_tokens,
                "total_cost": summary.total_cost,
                "overall_success_rate": summary.overall_success_rate(),
            },
            "rows": rows,
            "skipped": report.skipped,
        })
    }
}

fn row_value(row: &AggregatedRow) -> Value {
    let record = &row.record;
    json!({
        "service": row.service,
        "tool": row.tool,
        "successful_operations": record.successful_operations,
        "server_errors": record.server_errors,
        "total_tokens": record.total_tokens,
        "total_cost": record.total_cost,
        "total_tests": record.total_tests,
        "failed_tests": record.failed_tests,
        "passed_tests": record.passed(),
        "error_rate": record.error_rate(),
        "success_rate": record.success_rate(),
        "execution_time_secs": record.execution_time_secs,
        "coverage": row.coverage,
        "overall_coverage": row.overall_coverage(),
        "coverage_snapshot": row.coverage_snapshot,
        "exit_code": row.exit_code,
        "timed_out": row.timed_out,
        "artifact": row.artifact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rest_bench_core::{ResultRecord, SkipReason, SkippedRun, Summary};
    use std::path::PathBuf;

    #[test]
    fn test_nulls_and_skips_preserved() {
        let report = AggregationReport {
            rows: vec![AggregatedRow {
                service: "ohsome".into(),
                tool: "autoresttest".into(),
                record: ResultRecord {
                    successful_operations: Some(5),
                    ..ResultRecord::default()
                },
                coverage: None,
                coverage_snapshot: None,
                artifact: PathBuf::from("data/results.json"),
                exit_code: None,
                timed_out: true,
            }],
            skipped: vec![SkippedRun {
                service: "ohsome".into(),
                tool: "logiagent".into(),
                path: PathBuf::from("results/ohsome/logiagent"),
                reason: SkipReason::NoArtifact,
            }],
            summary: Summary {
                rows: 1,
                skipped: 1,
                ..Summary::default()
            },
        };

        let value = JsonExporter::to_value(&report);
        let row = &value["rows"][0];
        assert_eq!(row["successful_operations"], 5);
        assert!(row["total_tests"].is_null());
        assert!(row["error_rate"].is_null());
        assert!(row["coverage"].is_null());
        assert_eq!(row["timed_out"], true);
        assert!(value["summary"]["overall_success_rate"].is_null());
        assert_eq!(value["skipped"][0]["reason"]["kind"], "no_artifact");
    }

    #[test]
    fn test_export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        JsonExporter::export(&AggregationReport::default(), &path).unwrap();
        let value: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["rows"], json!([]));
    }
}
