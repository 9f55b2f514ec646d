//! Result normalization
//!
//! Each tool writes its own `results.json`. The fields overlap but do not
//! agree: some tools report no test counts, one reports server errors as a
//! list of endpoints, and only some report a duration. One adapter per tool
//! maps its native shape into one [`ResultRecord`] in which an
//! unreported value is `None`, never zero.

mod adapters;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use crate::catalog::ToolId;

/// Native result artifact name
pub const RESULT_FILE: &str = "results.json";

/// Normalized outcome of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Operations exercised with a successful response
    pub successful_operations: Option<u64>,
    /// Unique server errors
    pub server_errors: Option<u64>,
    /// LLM tokens consumed
    pub total_tokens: Option<u64>,
    /// LLM cost in currency units
    pub total_cost: Option<f64>,
    /// Generated tests
    pub total_tests: Option<u64>,
    /// Failing tests
    pub failed_tests: Option<u64>,
    /// Passing tests, when reported
    pub passed_tests: Option<u64>,
    /// Duration reported by the tool
    pub execution_time_secs: Option<f64>,
}

impl ResultRecord {
    /// Reported passed tests, else `total - failed`
    pub fn passed(&self) -> Option<u64> {
        self.passed_tests.or_else(|| match (self.total_tests, self.failed_tests) {
            (Some(total), Some(failed)) => total.checked_sub(failed),
            _ => None,
        })
    }

    /// `failed / total` in percent
    pub fn error_rate(&self) -> Option<f64> {
        match (self.total_tests, self.failed_tests) {
            (Some(total), Some(failed)) if total > 0 && failed <= total => {
                Some(failed as f64 / total as f64 * 100.0)
            }
            _ => None,
        }
    }

    /// `100 - error_rate`
    pub fn success_rate(&self) -> Option<f64> {
        self.error_rate().map(|rate| 100.0 - rate)
    }
}

/// Map a parsed artifact of `tool` into a [`ResultRecord`]
pub fn normalize(tool: ToolId, raw: &Value) -> Result<ResultRecord, ResultError> {
    let object = raw.as_object().ok_or(ResultError::NotAnObject)?;
    match tool {
        ToolId::Restifai => adapters::restifai(object),
        ToolId::Autoresttest => adapters::autoresttest(object),
        ToolId::Logiagent => adapters::logiagent(object),
    }
}

/// Read and normalize the artifact at `path`
pub fn read_result(tool: ToolId, path: &Path) -> Result<ResultRecord, ResultError> {
    let raw = read_json(path)?;
    normalize(tool, &raw).map_err(|e| e.at(path))
}

/// Duration field of an artifact regardless of tool
pub fn read_raw_duration(path: &Path) -> Result<Option<f64>, ResultError> {
    let raw = read_json(path)?;
    let object = raw.as_object().ok_or(ResultError::NotAnObject)?;
    adapters::duration(object).map_err(|e| e.at(path))
}

fn read_json(path: &Path) -> Result<Value, ResultError> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|source| ResultError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Most recently modified `results.json` below `tool_dir`
///
/// Coverage snapshots under `jacoco/` are not searched.
pub fn latest_result_artifact(tool_dir: &Path) -> Option<PathBuf> {
    WalkDir::new(tool_dir)
        .into_iter()
        .filter_entry(|entry| entry.depth() != 1 || entry.file_name() != "jacoco")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == RESULT_FILE)
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.into_path())
        })
        .max()
        .map(|(_, path)| path)
}

/// Errors reading a result artifact
#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    /// Not valid JSON (truncated, partially written)
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// File
        path: PathBuf,
        /// Parser error
        source: serde_json::Error,
    },

    /// Top level is not an object
    #[error("result artifact is not a JSON object")]
    NotAnObject,

    /// A field has an unusable value
    #[error("field '{field}': {reason}")]
    Field {
        /// Field name
        field: &'static str,
        /// What was wrong
        reason: String,
    },

    /// Wrapped with the offending file
    #[error("{path}: {source}")]
    At {
        /// File
        path: PathBuf,
        /// Underlying error
        source: Box<ResultError>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResultError {
    fn at(self, path: &Path) -> Self {
        match self {
            ResultError::Json { .. } | ResultError::At { .. } => self,
            other => ResultError::At {
                path: path.to_path_buf(),
                source: Box::new(other),
            },
        }
    }
}
