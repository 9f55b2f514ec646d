//! Metrics aggregation over the results tree
//!
//! One row per `results/<service>/<tool>/` directory that holds a readable
//! result artifact. Rows are ordered by service then tool. A directory that
//! cannot be turned into a row is skipped and listed with its reason; it
//! never aborts the pass. Runs whose manifest says they are still in
//! progress are skipped as well, so aggregating next to a live run is safe.
//!
//! # Example
//!
//! ```ignore
//! let report = aggregate(Path::new("results"))?;
//! for skipped in &report.skipped {
//!     eprintln!("{}/{}: {}", skipped.service, skipped.tool, skipped.reason);
//! }
//! ```

mod discovery;

pub use discovery::{discover_runs, Discovery, RunDirectory, ANY_TOOL};

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::ToolId;
use crate::coverage::{self, CoverageReport};
use crate::manifest::RunManifest;
use crate::metrics::{latest_result_artifact, read_result, ResultRecord};

/// One normalized run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    /// Service directory name
    pub service: String,
    /// Tool directory name
    pub tool: String,
    /// Normalized metrics
    pub record: ResultRecord,
    /// Canonical coverage snapshot, local services only
    pub coverage: Option<CoverageReport>,
    /// Timestamp of that snapshot
    pub coverage_snapshot: Option<String>,
    /// Artifact the row was read from
    pub artifact: PathBuf,
    /// Exit code from the run manifest
    pub exit_code: Option<i32>,
    /// Tool was killed at its deadline; metrics may be partial
    pub timed_out: bool,
}

impl AggregatedRow {
    /// Mean of the present coverage dimensions
    pub fn overall_coverage(&self) -> Option<f64> {
        self.coverage.as_ref().and_then(CoverageReport::overall)
    }
}

/// Why a run directory produced no row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Directory name is not a known tool, so no adapter applies
    UnknownTool,
    /// Manifest has no finish time
    InProgress,
    /// No `results.json` anywhere below the directory
    NoArtifact,
    /// Artifact or manifest could not be read
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownTool => f.write_str("unknown tool"),
            SkipReason::InProgress => f.write_str("run in progress"),
            SkipReason::NoArtifact => f.write_str("no result artifact"),
            SkipReason::Unreadable(reason) => write!(f, "unreadable: {reason}"),
        }
    }
}

/// A directory that produced no row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRun {
    /// Service directory name
    pub service: String,
    /// Tool directory name
    pub tool: String,
    /// Directory
    pub path: PathBuf,
    /// Why
    pub reason: SkipReason,
}

/// Totals over all rows; missing values are left out, not counted as zero
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Rows aggregated
    pub rows: usize,
    /// Directories skipped
    pub skipped: usize,
    /// Sum of reported test counts
    pub total_tests: u64,
    /// Sum of reported failed tests
    pub total_failed: u64,
    /// Sum of reported tokens
    pub total_tokens: u64,
    /// Sum of reported cost
    pub total_cost: f64,
}

impl Summary {
    /// `(tests - failed) / tests` in percent
    pub fn overall_success_rate(&self) -> Option<f64> {
        if self.total_tests == 0 {
            return None;
        }
        let passed = self.total_tests.saturating_sub(self.total_failed);
        Some(passed as f64 / self.total_tests as f64 * 100.0)
    }
}

/// Result of an aggregation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationReport {
    /// Rows ordered by service then tool
    pub rows: Vec<AggregatedRow>,
    /// Skipped directories in the same order
    pub skipped: Vec<SkippedRun>,
    /// Totals
    pub summary: Summary,
}

/// Aggregate every run below `results_dir`
pub fn aggregate(results_dir: &Path) -> Result<AggregationReport, AggregateError> {
    let discovery = discover_runs(results_dir)?;
    tracing::info!(
        results_dir = %results_dir.display(),
        runs = discovery.runs.len(),
        "Aggregating results"
    );

    let mut report = AggregationReport {
        skipped: discovery.unreadable,
        ..AggregationReport::default()
    };
    for run in discovery.runs {
        match aggregate_run(&run) {
            Ok(row) => report.rows.push(row),
            Err(reason) => {
                tracing::warn!(
                    service = %run.service,
                    tool = %run.tool,
                    reason = %reason,
                    "Skipping run directory"
                );
                report.skipped.push(SkippedRun {
                    service: run.service,
                    tool: run.tool,
                    path: run.path,
                    reason,
                });
            }
        }
    }
    report
        .skipped
        .sort_by(|a, b| (&a.service, &a.tool).cmp(&(&b.service, &b.tool)));
    report.summary = summarize(&report);

    tracing::info!(
        rows = report.summary.rows,
        skipped = report.summary.skipped,
        "Aggregation complete"
    );
    Ok(report)
}

fn aggregate_run(run: &RunDirectory) -> Result<AggregatedRow, SkipReason> {
    let tool: ToolId = run.tool.parse().map_err(|_| SkipReason::UnknownTool)?;

    let manifest = RunManifest::read(&run.path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
    if manifest.as_ref().is_some_and(|m| !m.is_complete()) {
        return Err(SkipReason::InProgress);
    }

    let artifact = latest_result_artifact(&run.path).ok_or(SkipReason::NoArtifact)?;
    let record = read_result(tool, &artifact).map_err(|e| SkipReason::Unreadable(e.to_string()))?;

    let (coverage_snapshot, coverage) = match coverage::load_latest(&run.path.join("jacoco")) {
        Some(Ok((timestamp, report))) => (Some(timestamp), Some(report)),
        Some(Err(e)) => {
            tracing::warn!(service = %run.service, tool = %run.tool, error = %e, "Ignoring unreadable coverage report");
            (None, None)
        }
        None => (None, None),
    };

    Ok(AggregatedRow {
        service: run.service.clone(),
        tool: run.tool.clone(),
        record,
        coverage,
        coverage_snapshot,
        artifact,
        exit_code: manifest.as_ref().and_then(|m| m.exit_code),
        timed_out: manifest.as_ref().is_some_and(|m| m.timed_out),
    })
}

fn summarize(report: &AggregationReport) -> Summary {
    let records = report.rows.iter().map(|row| &row.record);
    Summary {
        rows: report.rows.len(),
        skipped: report.skipped.len(),
        total_tests: records.clone().filter_map(|r| r.total_tests).sum(),
        total_failed: records.clone().filter_map(|r| r.failed_tests).sum(),
        total_tokens: records.clone().filter_map(|r| r.total_tokens).sum(),
        total_cost: records.filter_map(|r| r.total_cost).sum(),
    }
}

/// Errors that stop aggregation as a whole
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// Results root does not exist
    #[error("results directory {0} not found")]
    MissingResultsDir(PathBuf),

    /// IO error while walking the tree
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
