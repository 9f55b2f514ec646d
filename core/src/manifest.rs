//! Run manifest (`results/<service>/<tool>/run.json`)
//!
//! Written with `finished_at = null` before the tool is dispatched and
//! rewritten once the run has been torn down. Readers treat an unfinished
//! manifest as a run in progress.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetSource, TimeBudget};
use crate::catalog::{ServiceId, ToolId};
use crate::metrics::ResultError;

/// Manifest file name inside a run directory
pub const MANIFEST_FILE: &str = "run.json";

/// Bookkeeping for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Target service
    pub service: ServiceId,
    /// Tool under test
    pub tool: ToolId,
    /// URL handed to the tool
    pub base_url: String,
    /// Budget handed to the tool
    pub budget: TimeBudget,
    /// Where the budget came from
    pub budget_source: BudgetSource,
    /// Start of the run
    pub started_at: DateTime<Utc>,
    /// End of teardown; `None` while the run is in progress
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock seconds from start to end of teardown
    pub elapsed_secs: Option<f64>,
    /// Tool exit code; `None` if killed by a signal or never started
    pub exit_code: Option<i32>,
    /// Tool was killed at its hard deadline
    #[serde(default)]
    pub timed_out: bool,
    /// Run was cancelled by the operator
    #[serde(default)]
    pub interrupted: bool,
    /// Coverage snapshot written for this run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_dir: Option<PathBuf>,
    /// First error that ended the run early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunManifest {
    /// Manifest for a run that is about to start
    pub fn begin(
        service: ServiceId,
        tool: ToolId,
        base_url: impl Into<String>,
        budget: TimeBudget,
        budget_source: BudgetSource,
    ) -> Self {
        Self {
            service,
            tool,
            base_url: base_url.into(),
            budget,
            budget_source,
            started_at: Utc::now(),
            finished_at: None,
            elapsed_secs: None,
            exit_code: None,
            timed_out: false,
            interrupted: false,
            coverage_dir: None,
            error: None,
        }
    }

    /// Mark the run finished now
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.elapsed_secs = Some((now - self.started_at).num_milliseconds() as f64 / 1000.0);
        self.finished_at = Some(now);
    }

    /// Whether the run has been torn down
    pub fn is_complete(&self) -> bool {
        self.finished_at.is_some()
    }

    /// `<run_dir>/run.json`
    pub fn path(run_dir: &Path) -> PathBuf {
        run_dir.join(MANIFEST_FILE)
    }

    /// Write atomically into `run_dir`
    pub fn write(&self, run_dir: &Path) -> Result<(), ResultError> {
        let path = Self::path(run_dir);
        let tmp = run_dir.join(format!(".{MANIFEST_FILE}.tmp"));
        let body = serde_json::to_vec_pretty(self).map_err(|source| ResultError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read from `run_dir`; `None` when there is no manifest
    pub fn read(run_dir: &Path) -> Result<Option<Self>, ResultError> {
        let path = Self::path(run_dir);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| ResultError::Json { path, source })
    }
}
