//! Container execution with a hard deadline

use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use super::invocation::{build_invocation, container_name, Invocation};
use super::{DispatchError, DispatchOutcome, DispatchRequest, ToolDispatcher};
use crate::catalog::{ServiceId, ToolId};
use crate::config::HarnessConfig;

/// Tool output captured in the run directory
pub const TOOL_LOG: &str = "tool.log";

/// Exit of a single invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    /// Exit code; `None` when killed
    pub exit_code: Option<i32>,
    /// Wall-clock time
    pub elapsed: Duration,
    /// Killed at the deadline
    pub timed_out: bool,
}

/// Run `invocation`, appending its output to `log_file`
///
/// The child is killed when the deadline passes or when the returned future
/// is dropped.
pub async fn run_invocation(invocation: &Invocation, log_file: &Path) -> Result<RunStatus, DispatchError> {
    let stdout = OpenOptions::new().create(true).append(true).open(log_file)?;
    let stderr = stdout.try_clone()?;

    let start = Instant::now();
    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| DispatchError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

    match tokio::time::timeout(invocation.deadline, child.wait()).await {
        Ok(status) => {
            let status = status?;
            Ok(RunStatus {
                exit_code: status.code(),
                elapsed: start.elapsed(),
                timed_out: false,
            })
        }
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(program = %invocation.program, error = %e, "Failed to kill timed out process");
            }
            Ok(RunStatus {
                exit_code: None,
                elapsed: start.elapsed(),
                timed_out: true,
            })
        }
    }
}

/// Dispatches tools as containers through the configured runtime
#[derive(Debug, Clone)]
pub struct ContainerDispatcher {
    config: Arc<HarnessConfig>,
}

impl ContainerDispatcher {
    /// Create a dispatcher
    pub fn new(config: Arc<HarnessConfig>) -> Self {
        Self { config }
    }

    async fn runtime(&self, args: &[&str]) {
        let result = Command::new(&self.config.container_runtime)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if !status.success() => {
                tracing::debug!(args = ?args, %status, "Container runtime command failed")
            }
            Err(e) => tracing::warn!(args = ?args, error = %e, "Container runtime unavailable"),
            Ok(_) => {}
        }
    }
}

#[async_trait]
impl ToolDispatcher for ContainerDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        let tool = self.config.catalog.tool(request.tool)?;
        let invocation = build_invocation(&self.config, tool, request)?;

        std::fs::create_dir_all(&request.run_dir)?;
        let log_file = request.run_dir.join(TOOL_LOG);

        // A container left over from an interrupted run would hold the name.
        self.runtime(&["rm", "-f", &invocation.container]).await;

        tracing::info!(
            service = %request.service,
            tool = %request.tool,
            budget = %request.budget,
            deadline_secs = invocation.deadline.as_secs(),
            container = %invocation.container,
            "Dispatching tool"
        );
        tracing::debug!(command = %invocation.display(), "Tool command line");

        let status = run_invocation(&invocation, &log_file).await?;
        if status.timed_out {
            tracing::warn!(
                service = %request.service,
                tool = %request.tool,
                elapsed_secs = status.elapsed.as_secs_f64(),
                "Tool exceeded its deadline, killing container"
            );
            self.runtime(&["kill", &invocation.container]).await;
        } else {
            tracing::info!(
                service = %request.service,
                tool = %request.tool,
                exit_code = ?status.exit_code,
                elapsed_secs = status.elapsed.as_secs_f64(),
                "Tool finished"
            );
        }

        Ok(DispatchOutcome {
            exit_code: status.exit_code,
            elapsed: status.elapsed,
            timed_out: status.timed_out,
            log_file,
        })
    }

    async fn cancel(&self, service: ServiceId, tool: ToolId) {
        let container = container_name(service, tool);
        tracing::info!(container = %container, "Killing tool container");
        self.runtime(&["kill", &container]).await;
    }
}
