//! Coverage collection for local services
//!
//! Raw JaCoCo execution data captured while a tool ran is rendered into an
//! HTML/XML report under `results/<service>/<tool>/jacoco/<timestamp>/`.
//! Every run gets a fresh timestamp directory, so earlier reports are never
//! overwritten; the lexicographically greatest timestamp is the canonical one.

mod jacoco;

pub use jacoco::{parse_html_index, JacocoReporter, SUMMARY_FILE};

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::{ServiceId, ToolId};

/// Directory name format of coverage snapshots
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Coverage percentages; `None` when the dimension could not be read
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Instruction coverage in percent
    pub instruction: Option<f64>,
    /// Branch coverage in percent
    pub branch: Option<f64>,
    /// Line coverage in percent
    pub line: Option<f64>,
    /// Method coverage in percent
    pub method: Option<f64>,
}

impl CoverageReport {
    /// Mean of the dimensions that are present
    pub fn overall(&self) -> Option<f64> {
        let present: Vec<f64> = self.dimensions().into_iter().flatten().collect();
        if present.is_empty() {
            None
        } else {
            Some(present.iter().sum::<f64>() / present.len() as f64)
        }
    }

    /// Drop any dimension outside `[0, 100]`
    pub fn within_bounds(self) -> Self {
        let check = |value: Option<f64>| value.filter(|v| (0.0..=100.0).contains(v));
        Self {
            instruction: check(self.instruction),
            branch: check(self.branch),
            line: check(self.line),
            method: check(self.method),
        }
    }

    /// Whether no dimension was found
    pub fn is_empty(&self) -> bool {
        self.dimensions().iter().all(Option::is_none)
    }

    fn dimensions(&self) -> [Option<f64>; 4] {
        [self.instruction, self.branch, self.line, self.method]
    }
}

/// Inputs for rendering one coverage snapshot
#[derive(Debug, Clone)]
pub struct CoverageRequest {
    /// Service that was measured
    pub service: ServiceId,
    /// Tool that drove the service
    pub tool: ToolId,
    /// Raw capture written by the agent
    pub capture: PathBuf,
    /// Compiled classes of the service
    pub classfiles: PathBuf,
    /// `results/<service>/<tool>/jacoco`
    pub output_root: PathBuf,
}

/// A rendered coverage report
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageSnapshot {
    /// Timestamp directory name
    pub timestamp: String,
    /// `<output_root>/<timestamp>`
    pub directory: PathBuf,
    /// Parsed percentages
    pub report: CoverageReport,
}

/// Renders raw instrumentation data into a coverage report
#[async_trait]
pub trait CoverageReporter: Send + Sync {
    /// Render a new snapshot; never touches existing snapshots
    async fn report(&self, request: &CoverageRequest) -> Result<CoverageSnapshot, CoverageError>;
}

/// Create a fresh `<root>/<timestamp>` directory, suffixing `_NNN` on collision
///
/// The suffix is zero-padded so names keep sorting in creation order.
pub fn create_snapshot_dir(root: &Path, timestamp: &str) -> Result<(String, PathBuf), CoverageError> {
    std::fs::create_dir_all(root)?;
    let mut name = timestamp.to_string();
    let mut attempt = 0;
    loop {
        let dir = root.join(&name);
        match std::fs::create_dir(&dir) {
            Ok(()) => return Ok((name, dir)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                attempt += 1;
                name = format!("{timestamp}_{attempt:03}");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Locate the canonical `index.html` below `<tool dir>/jacoco`
///
/// Accepts both `<ts>/jacoco/index.html` and `<ts>/index.html`; the greatest
/// timestamp directory containing either wins.
pub fn latest_html_index(coverage_root: &Path) -> Option<(String, PathBuf)> {
    let entries = std::fs::read_dir(coverage_root).ok()?;
    let mut snapshots: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let dir = entry.path();
            [dir.join("jacoco").join("index.html"), dir.join("index.html")]
                .into_iter()
                .find(|index| index.is_file())
                .map(|index| (name, index))
        })
        .collect();
    snapshots.sort_by(|a, b| a.0.cmp(&b.0));
    snapshots.pop()
}

/// Percentages of the canonical snapshot below `coverage_root`
///
/// Reads the `coverage.json` summary when the snapshot has one, else parses
/// the HTML report. `None` when there is no snapshot at all.
pub fn load_latest(coverage_root: &Path) -> Option<Result<(String, CoverageReport), CoverageError>> {
    let (timestamp, index) = latest_html_index(coverage_root)?;
    let summary = coverage_root.join(&timestamp).join(SUMMARY_FILE);
    let loaded = if summary.is_file() {
        std::fs::read_to_string(&summary)
            .map_err(CoverageError::from)
            .and_then(|text| {
                serde_json::from_str::<CoverageReport>(&text).map_err(|e| CoverageError::Malformed {
                    path: summary.clone(),
                    reason: e.to_string(),
                })
            })
            .map(CoverageReport::within_bounds)
    } else {
        std::fs::read_to_string(&index)
            .map_err(CoverageError::from)
            .and_then(|html| {
                parse_html_index(&html).ok_or_else(|| CoverageError::Malformed {
                    path: index.clone(),
                    reason: "no totals row".into(),
                })
            })
    };
    Some(loaded.map(|report| (timestamp, report)))
}

/// Coverage errors
#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    /// No capture file; the service probably never started
    #[error("no coverage capture at {0}")]
    MissingCapture(PathBuf),

    /// Capture file exists but holds no data
    #[error("coverage capture at {0} is empty")]
    EmptyCapture(PathBuf),

    /// The report CLI could not be spawned
    #[error("failed to run '{command}': {source}")]
    Spawn {
        /// Command line
        command: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// The report CLI failed
    #[error("coverage report tool failed with {status}: {stderr}")]
    Tool {
        /// Exit status
        status: ExitStatus,
        /// Captured stderr
        stderr: String,
    },

    /// The rendered report could not be read
    #[error("malformed coverage report {path}: {reason}")]
    Malformed {
        /// Report file
        path: PathBuf,
        /// What was wrong
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
