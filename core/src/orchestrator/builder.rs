//! Builder pattern for Orchestrator construction

use std::sync::Arc;

use crate::config::{HarnessConfig, SupervisorKind};
use crate::coverage::{CoverageReporter, JacocoReporter};
use crate::dispatch::{ContainerDispatcher, ToolDispatcher};
use crate::error::{BenchError, BenchResult};
use crate::lifecycle::{ChildSupervisor, ServiceLifecycle, SessionSupervisor, TmuxSupervisor};

use super::executor::Orchestrator;

/// Builder for creating an Orchestrator
///
/// The session supervisor and coverage reporter default to the ones named by
/// the configuration; the dispatcher must be set explicitly (or via
/// [`OrchestratorBuilder::container_dispatcher`]).
///
/// # Example
///
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .config(config)
///     .container_dispatcher()
///     .build()?;
/// ```
pub struct OrchestratorBuilder {
    config: Arc<HarnessConfig>,
    dispatcher: Option<Arc<dyn ToolDispatcher>>,
    container_dispatch: bool,
    supervisor: Option<Arc<dyn SessionSupervisor>>,
    coverage: Option<Arc<dyn CoverageReporter>>,
}

impl OrchestratorBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: Arc::new(HarnessConfig::default()),
            dispatcher: None,
            container_dispatch: false,
            supervisor: None,
            coverage: None,
        }
    }

    /// Set the harness configuration
    pub fn config(mut self, config: HarnessConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Set the tool dispatcher
    pub fn dispatcher(mut self, dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Dispatch tools as containers through the configured runtime
    pub fn container_dispatcher(mut self) -> Self {
        self.container_dispatch = true;
        self
    }

    /// Override the session supervisor
    pub fn supervisor(mut self, supervisor: Arc<dyn SessionSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Override the coverage reporter
    pub fn coverage(mut self, coverage: Arc<dyn CoverageReporter>) -> Self {
        self.coverage = Some(coverage);
        self
    }

    /// Build the orchestrator
    ///
    /// # Errors
    ///
    /// Returns an error if no dispatcher is set or the configuration is invalid.
    pub fn build(self) -> BenchResult<Orchestrator> {
        let dispatcher: Arc<dyn ToolDispatcher> = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None if self.container_dispatch => {
                Arc::new(ContainerDispatcher::new(Arc::clone(&self.config)))
            }
            None => return Err(BenchError::missing_config("dispatcher")),
        };

        self.config.validate()?;

        let supervisor: Arc<dyn SessionSupervisor> = match self.supervisor {
            Some(supervisor) => supervisor,
            None => match self.config.supervisor {
                SupervisorKind::Tmux => Arc::new(TmuxSupervisor::new()),
                SupervisorKind::Process => Arc::new(ChildSupervisor::new()),
            },
        };
        let coverage: Arc<dyn CoverageReporter> = match self.coverage {
            Some(coverage) => coverage,
            None => Arc::new(JacocoReporter::new(&self.config.jacoco)),
        };

        let lifecycle = ServiceLifecycle::new(Arc::clone(&self.config), supervisor, coverage);

        Ok(Orchestrator::new(self.config, lifecycle, dispatcher))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
