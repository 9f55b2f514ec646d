//! Orchestrator execution logic

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::budget::{resolve_budget, ResolvedBudget};
use crate::catalog::{ServiceId, ServiceKind, ToolId};
use crate::config::HarnessConfig;
use crate::coverage::{CoverageError, CoverageSnapshot};
use crate::dispatch::{DispatchOutcome, DispatchRequest, ToolDispatcher};
use crate::error::{BenchError, BenchResult};
use crate::lifecycle::{LeaseError, LifecycleError, RunKey, RunLease, RunRegistry, ServiceLifecycle};
use crate::manifest::RunManifest;

/// What the operator asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    /// Target service
    pub service: ServiceId,
    /// Tool to run
    pub tool: ToolId,
    /// Explicit budget in seconds
    pub budget: Option<u64>,
}

/// A validated run, resolved without side effects
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    /// Target service
    pub service: ServiceId,
    /// Tool to run
    pub tool: ToolId,
    /// Local or remote
    pub kind: ServiceKind,
    /// URL handed to the tool
    pub base_url: String,
    /// OpenAPI file name
    pub spec_file: String,
    /// Budget and its provenance
    pub budget: ResolvedBudget,
    /// `results/<service>/<tool>/`
    pub run_dir: PathBuf,
}

/// Outcome of a completed run
#[derive(Debug)]
pub struct RunReport {
    /// The executed plan
    pub plan: RunPlan,
    /// How the tool ended
    pub outcome: DispatchOutcome,
    /// Coverage for local services
    pub coverage: Option<Result<CoverageSnapshot, CoverageError>>,
    /// Teardown problems that did not stop the run
    pub teardown_errors: Vec<LifecycleError>,
    /// Final manifest as written
    pub manifest: RunManifest,
}

/// Orchestrator runs one `(service, tool)` pair at a time
///
/// Start always precedes dispatch, dispatch precedes stop, and stop precedes
/// coverage rendering. A shutdown signal kills the tool and the service.
pub struct Orchestrator {
    /// Harness configuration
    pub(crate) config: Arc<HarnessConfig>,

    /// Local service lifecycle
    pub(crate) lifecycle: ServiceLifecycle,

    /// Tool dispatcher
    pub(crate) dispatcher: Arc<dyn ToolDispatcher>,

    /// Active `(service, tool)` runs
    pub(crate) runs: RunRegistry,

    /// Shutdown signal sender
    pub(crate) shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// Use `OrchestratorBuilder` for a more ergonomic construction.
    pub fn new(
        config: Arc<HarnessConfig>,
        lifecycle: ServiceLifecycle,
        dispatcher: Arc<dyn ToolDispatcher>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            lifecycle,
            dispatcher,
            runs: RunRegistry::new(),
            shutdown_tx,
        }
    }

    /// Trigger shutdown of the current run
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get the harness configuration
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Validate `request` and resolve everything a run needs
    ///
    /// Touches nothing; every configuration error surfaces here.
    pub fn plan(&self, request: RunRequest) -> BenchResult<RunPlan> {
        let service = self.config.catalog.service(request.service)?;
        self.config.catalog.tool(request.tool)?;
        let budget = resolve_budget(&self.config, request.service, request.tool, request.budget)?;

        Ok(RunPlan {
            service: request.service,
            tool: request.tool,
            kind: service.kind(),
            base_url: service.base_url.clone(),
            spec_file: service.spec_file_name(request.service),
            budget,
            run_dir: self.config.run_dir(request.service, request.tool),
        })
    }

    /// Execute one run
    pub async fn run(&self, request: RunRequest) -> BenchResult<RunReport> {
        let plan = self.plan(request)?;
        let service_spec = self.config.catalog.service(plan.service)?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // Held until the run returns; a rejected run leaves no trace on disk.
        let _run_lease = self.acquire_run(plan.service, plan.tool)?;

        std::fs::create_dir_all(&plan.run_dir)?;
        let mut manifest = RunManifest::begin(
            plan.service,
            plan.tool,
            plan.base_url.clone(),
            plan.budget.budget,
            plan.budget.source.clone(),
        );
        manifest.write(&plan.run_dir)?;

        tracing::info!(
            service = %plan.service,
            tool = %plan.tool,
            kind = ?plan.kind,
            base_url = %plan.base_url,
            budget = %plan.budget.budget,
            run_dir = %plan.run_dir.display(),
            "Starting run"
        );

        let handle = if plan.kind == ServiceKind::Local {
            let started = tokio::select! {
                result = self.lifecycle.start(plan.service, service_spec) => Some(result),
                _ = shutdown_rx.recv() => None,
            };
            match started {
                Some(Ok(handle)) => Some(handle),
                Some(Err(e)) => {
                    manifest.error = Some(e.to_string());
                    manifest.finish();
                    manifest.write(&plan.run_dir)?;
                    return Err(e.into());
                }
                None => {
                    tracing::info!(service = %plan.service, "Interrupted while starting service");
                    self.lifecycle.abort(plan.service, service_spec).await;
                    manifest.interrupted = true;
                    manifest.finish();
                    manifest.write(&plan.run_dir)?;
                    return Err(BenchError::Interrupted);
                }
            }
        } else {
            None
        };

        let dispatch_request = DispatchRequest {
            service: plan.service,
            tool: plan.tool,
            base_url: plan.base_url.clone(),
            spec_file: plan.spec_file.clone(),
            budget: plan.budget.budget,
            run_dir: plan.run_dir.clone(),
        };
        let dispatched = tokio::select! {
            result = self.dispatcher.dispatch(&dispatch_request) => Some(result),
            _ = shutdown_rx.recv() => None,
        };
        if dispatched.is_none() {
            tracing::info!(service = %plan.service, tool = %plan.tool, "Interrupted, killing tool");
            self.dispatcher.cancel(plan.service, plan.tool).await;
            manifest.interrupted = true;
        }

        // The service is released whatever happened to the tool.
        let (coverage, teardown_errors) = match handle {
            Some(handle) => {
                let report = self.lifecycle.stop(handle, plan.tool).await;
                (Some(report.coverage), report.teardown_errors)
            }
            None => (None, Vec::new()),
        };
        if let Some(Ok(snapshot)) = &coverage {
            manifest.coverage_dir = Some(snapshot.directory.clone());
        }

        let outcome = match dispatched {
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => {
                manifest.error = Some(e.to_string());
                manifest.finish();
                manifest.write(&plan.run_dir)?;
                return Err(e.into());
            }
            None => {
                manifest.finish();
                manifest.write(&plan.run_dir)?;
                return Err(BenchError::Interrupted);
            }
        };

        manifest.exit_code = outcome.exit_code;
        manifest.timed_out = outcome.timed_out;
        manifest.finish();
        manifest.write(&plan.run_dir)?;

        if !outcome.success() {
            tracing::warn!(
                service = %plan.service,
                tool = %plan.tool,
                exit_code = ?outcome.exit_code,
                timed_out = outcome.timed_out,
                "Tool did not finish cleanly; results may be partial"
            );
        }
        tracing::info!(
            service = %plan.service,
            tool = %plan.tool,
            elapsed_secs = ?manifest.elapsed_secs,
            "Run completed"
        );

        Ok(RunReport {
            plan,
            outcome,
            coverage,
            teardown_errors,
            manifest,
        })
    }

    fn acquire_run(&self, service: ServiceId, tool: ToolId) -> BenchResult<RunLease> {
        let key = RunKey { service, tool };
        self.runs
            .try_acquire(key, &self.config.run_lock_file(service, tool))
            .map_err(|e| match e {
                LeaseError::Contended => BenchError::RunInProgress { service, tool },
                LeaseError::Io { path, source } => BenchError::RunLock { path, source },
            })
    }

    /// Run with Ctrl+C signal handling
    ///
    /// Ctrl+C kills the tool and the service, then returns
    /// [`BenchError::Interrupted`].
    pub async fn run_with_signal_handling(&self, request: RunRequest) -> BenchResult<RunReport> {
        let shutdown_tx = self.shutdown_tx.clone();

        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, tearing down run...");
                    let _ = shutdown_tx.send(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let result = self.run(request).await;

        signal_handle.abort();

        result
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("results_dir", &self.config.results_dir)
            .field("container_runtime", &self.config.container_runtime)
            .field("supervisor", &self.config.supervisor)
            .finish()
    }
}
