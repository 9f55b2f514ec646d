//! Error types for rest-bench-core

use std::path::PathBuf;

use thiserror::Error;

use crate::aggregator::AggregateError;
use crate::catalog::{ServiceId, ToolId};
use crate::config::ConfigError;
use crate::coverage::CoverageError;
use crate::dispatch::DispatchError;
use crate::lifecycle::LifecycleError;
use crate::metrics::ResultError;

/// Core error type
#[derive(Error, Debug)]
pub enum BenchError {
    /// Configuration error (bad catalog entry, missing parameter)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Service lifecycle error
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Tool dispatch error
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Coverage report error
    #[error("coverage error: {0}")]
    Coverage(#[from] CoverageError),

    /// Result artifact error
    #[error("result error: {0}")]
    Result(#[from] ResultError),

    /// Aggregation error
    #[error("aggregation error: {0}")]
    Aggregate(#[from] AggregateError),

    /// Another run of the same `(service, tool)` pair is active
    #[error("{service}/{tool} is already being run")]
    RunInProgress {
        /// Service id
        service: ServiceId,
        /// Tool id
        tool: ToolId,
    },

    /// Run lock file unusable
    #[error("failed to lock {path}: {source}")]
    RunLock {
        /// Lock file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Run was interrupted by the operator
    #[error("run interrupted")]
    Interrupted,

    /// Orchestration error
    #[error("orchestration error: {0}")]
    Orchestration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// A required builder or CLI parameter was not supplied
    pub fn missing_config(what: &str) -> Self {
        BenchError::Config(ConfigError::Missing(what.to_string()))
    }

    /// Generic orchestration failure
    pub fn orchestration(msg: impl Into<String>) -> Self {
        BenchError::Orchestration(msg.into())
    }

    /// Whether this error was raised before any side effect took place
    pub fn is_config(&self) -> bool {
        matches!(self, BenchError::Config(_))
    }
}

/// Result type alias
pub type BenchResult<T> = std::result::Result<T, BenchError>;
