//! Tool invocation dispatch
//!
//! Every tool runs in a container with the run directory mounted at the
//! tool's fixed output path, so its result artifact lands in
//! `results/<service>/<tool>/` without the tool knowing the host layout.
//! Dispatch blocks until the container exits or its hard deadline passes.

mod executor;
mod invocation;

pub use executor::{run_invocation, ContainerDispatcher, RunStatus, TOOL_LOG};
pub use invocation::{build_invocation, container_name, Invocation};

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::budget::TimeBudget;
use crate::catalog::{ServiceId, ToolId};
use crate::config::ConfigError;

/// One tool execution against a resolved service
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Target service
    pub service: ServiceId,
    /// Tool to run
    pub tool: ToolId,
    /// Reachable base URL
    pub base_url: String,
    /// OpenAPI file name inside the specs directory
    pub spec_file: String,
    /// Budget under the tool's discipline
    pub budget: TimeBudget,
    /// Host directory mounted as the tool's output
    pub run_dir: PathBuf,
}

/// How a dispatched tool ended
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Exit code; `None` when killed
    pub exit_code: Option<i32>,
    /// Wall-clock time
    pub elapsed: Duration,
    /// Killed at the hard deadline
    pub timed_out: bool,
    /// Combined stdout/stderr of the tool
    pub log_file: PathBuf,
}

impl DispatchOutcome {
    /// Exited on its own with status 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Runs tools
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Run the tool to completion or deadline
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchOutcome, DispatchError>;

    /// Kill an in-flight execution of `tool` against `service`
    async fn cancel(&self, service: ServiceId, tool: ToolId);
}

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A self-terminating tool was given a budget, or its template asks for one
    #[error("{0} is self-terminating and takes no budget")]
    BudgetNotAccepted(ToolId),

    /// A budget-bound tool was dispatched without a budget
    #[error("{0} requires a time budget")]
    BudgetRequired(ToolId),

    /// Template references an unknown placeholder
    #[error("unknown placeholder '{placeholder}' in {tool} arguments")]
    Placeholder {
        /// Tool
        tool: ToolId,
        /// The offending placeholder
        placeholder: String,
    },

    /// The container runtime could not be started
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program
        program: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Tool missing from the catalog
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
