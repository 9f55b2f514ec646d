//! Service lifecycle management for locally hosted targets
//!
//! A local service moves through `Idle -> Starting -> Running -> Stopping -> Idle`.
//! The manager:
//! - claims the service in the [`ServiceRegistry`] for the whole run
//! - kills any leftover session with the same name before starting
//! - clears the raw coverage capture and attaches the JaCoCo agent in append mode
//! - polls a [`ReadinessProbe`] until the service answers or the timeout expires
//! - on stop, kills the session, stops auxiliary stores and renders coverage
//!
//! # Example
//!
//! ```ignore
//! let lifecycle = ServiceLifecycle::new(config, supervisor, coverage);
//! let handle = lifecycle.start(ServiceId::GenomeNexus, spec).await?;
//! // ... run the tool ...
//! let report = lifecycle.stop(handle, ToolId::Restifai).await;
//! ```

mod readiness;
mod registry;
mod supervisor;

pub use readiness::ReadinessProbe;
pub use registry::{
    Lease, LeaseError, LeaseKey, LeaseRegistry, RunKey, RunLease, RunRegistry, ServiceLease, ServiceRegistry,
};
pub use supervisor::{run_shell, ChildSupervisor, SessionSupervisor, TmuxSupervisor};

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::catalog::{LocalService, ServiceId, ServiceSpec, ToolId};
use crate::config::HarnessConfig;
use crate::coverage::{CoverageError, CoverageReporter, CoverageRequest, CoverageSnapshot};

/// Lifecycle state of a local service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// No session
    Idle,
    /// Session launched, waiting for readiness
    Starting,
    /// Accepting traffic
    Running,
    /// Tearing down and collecting coverage
    Stopping,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Idle => "idle",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// A running local service; consumed by [`ServiceLifecycle::stop`]
#[derive(Debug)]
pub struct ServiceHandle {
    service: ServiceId,
    local: LocalService,
    state: ServiceState,
    started_at: Instant,
    ready_after: Duration,
    _lease: ServiceLease,
}

impl ServiceHandle {
    /// Service id
    pub fn service(&self) -> ServiceId {
        self.service
    }

    /// Session name
    pub fn session(&self) -> &'static str {
        self.service.as_str()
    }

    /// Listening port
    pub fn port(&self) -> u16 {
        self.local.port
    }

    /// Current state
    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Time the service needed to become ready
    pub fn ready_after(&self) -> Duration {
        self.ready_after
    }

    /// Time since launch
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Outcome of stopping a service
#[derive(Debug)]
pub struct StopReport {
    /// Whether a live session was found and killed
    pub session_found: bool,
    /// Coverage snapshot, or why none was produced
    pub coverage: Result<CoverageSnapshot, CoverageError>,
    /// Teardown steps that failed; none of them prevented releasing the service
    pub teardown_errors: Vec<LifecycleError>,
}

/// Starts and stops local services
pub struct ServiceLifecycle {
    config: Arc<HarnessConfig>,
    supervisor: Arc<dyn SessionSupervisor>,
    coverage: Arc<dyn CoverageReporter>,
    registry: ServiceRegistry,
}

impl ServiceLifecycle {
    /// Create a lifecycle manager
    pub fn new(
        config: Arc<HarnessConfig>,
        supervisor: Arc<dyn SessionSupervisor>,
        coverage: Arc<dyn CoverageReporter>,
    ) -> Self {
        Self {
            config,
            supervisor,
            coverage,
            registry: ServiceRegistry::new(),
        }
    }

    /// The in-process registry
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Bring `service` to a ready, instrumented state
    pub async fn start(
        &self,
        service: ServiceId,
        spec: &ServiceSpec,
    ) -> Result<ServiceHandle, LifecycleError> {
        let local = spec
            .local
            .as_ref()
            .ok_or(LifecycleError::NotLocal(service))?;
        let lease = self
            .registry
            .acquire(service, &self.config.lock_file(service))?;
        let session = service.as_str();

        tracing::info!(
            service = %service,
            port = local.port,
            supervisor = self.supervisor.name(),
            state = %ServiceState::Starting,
            "Starting service"
        );

        if self.supervisor.exists(session).await? {
            tracing::warn!(service = %service, "Leftover session found, terminating it first");
            self.supervisor.terminate(session).await?;
            tokio::time::sleep(self.config.teardown_settle).await;
        }

        if ReadinessProbe::Tcp.check(local.port).await {
            return Err(LifecycleError::PortInUse {
                service,
                port: local.port,
            });
        }

        let capture = self.config.coverage_capture(service);
        clear_capture(&capture)?;

        if let Some(aux) = &local.auxiliary {
            // A crashed run may have left the store up.
            match run_shell(&aux.stop_command).await {
                Ok(status) if !status.success() => {
                    tracing::debug!(store = %aux.name, status = %status, "No auxiliary store to clear")
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(store = %aux.name, error = %e, "Failed to clear auxiliary store")
                }
            }
            tracing::info!(service = %service, store = %aux.name, "Starting auxiliary store");
            let status = run_shell(&aux.start_command).await?;
            if !status.success() {
                return Err(LifecycleError::Auxiliary {
                    name: aux.name.clone(),
                    status,
                });
            }
        }

        let command = self.render_start_command(local, &capture);
        tracing::debug!(service = %service, command = %command, "Launching session");
        if let Err(e) = self.supervisor.launch(session, &command).await {
            self.stop_auxiliary(local).await;
            return Err(e);
        }

        let started_at = Instant::now();
        match self.await_ready(service, local).await {
            Ok(ready_after) => {
                tracing::info!(
                    service = %service,
                    ready_after_secs = ready_after.as_secs_f64(),
                    state = %ServiceState::Running,
                    "Service ready"
                );
                Ok(ServiceHandle {
                    service,
                    local: local.clone(),
                    state: ServiceState::Running,
                    started_at,
                    ready_after,
                    _lease: lease,
                })
            }
            Err(e) => {
                tracing::error!(service = %service, error = %e, "Service failed to become ready");
                self.abort(service, spec).await;
                Err(e)
            }
        }
    }

    /// Tear `handle` down and render coverage for `tool`
    ///
    /// Never fails: every error is recorded in the report and the service
    /// is released regardless.
    pub async fn stop(&self, mut handle: ServiceHandle, tool: ToolId) -> StopReport {
        handle.state = ServiceState::Stopping;
        let service = handle.service;
        tracing::info!(
            service = %service,
            tool = %tool,
            uptime_secs = handle.uptime().as_secs_f64(),
            state = %handle.state,
            "Stopping service"
        );

        let mut teardown_errors = Vec::new();
        let session_found = match self.supervisor.terminate(handle.session()).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "Failed to terminate session");
                teardown_errors.push(e);
                false
            }
        };
        tokio::time::sleep(self.config.teardown_settle).await;

        if let Some(command) = &handle.local.stop_command {
            match run_shell(command).await {
                Ok(status) if status.success() => {}
                Ok(status) => teardown_errors.push(LifecycleError::StopCommand { status }),
                Err(e) => teardown_errors.push(e),
            }
        }
        if let Some(aux) = &handle.local.auxiliary {
            match run_shell(&aux.stop_command).await {
                Ok(status) if status.success() => {}
                Ok(status) => teardown_errors.push(LifecycleError::Auxiliary {
                    name: aux.name.clone(),
                    status,
                }),
                Err(e) => teardown_errors.push(e),
            }
        }

        let request = CoverageRequest {
            service,
            tool,
            capture: self.config.coverage_capture(service),
            classfiles: handle.local.classfiles.clone(),
            output_root: self.config.run_dir(service, tool).join("jacoco"),
        };
        let coverage = self.coverage.report(&request).await;
        match &coverage {
            Ok(snapshot) => tracing::info!(
                service = %service,
                tool = %tool,
                directory = %snapshot.directory.display(),
                "Coverage report written"
            ),
            Err(e) => tracing::error!(service = %service, tool = %tool, error = %e, "Coverage report failed"),
        }

        drop(handle);
        tracing::info!(service = %service, state = %ServiceState::Idle, "Service released");

        StopReport {
            session_found,
            coverage,
            teardown_errors,
        }
    }

    /// Best-effort teardown without a handle (interrupted or failed start)
    pub async fn abort(&self, service: ServiceId, spec: &ServiceSpec) {
        let Some(local) = &spec.local else {
            return;
        };
        if let Err(e) = self.supervisor.terminate(service.as_str()).await {
            tracing::warn!(service = %service, error = %e, "Failed to terminate session");
        }
        self.stop_auxiliary(local).await;
    }

    async fn stop_auxiliary(&self, local: &LocalService) {
        if let Some(aux) = &local.auxiliary {
            if let Err(e) = run_shell(&aux.stop_command).await {
                tracing::warn!(store = %aux.name, error = %e, "Failed to stop auxiliary store");
            }
        }
    }

    async fn await_ready(
        &self,
        service: ServiceId,
        local: &LocalService,
    ) -> Result<Duration, LifecycleError> {
        let started = Instant::now();
        let timeout = Duration::from_secs(local.readiness_timeout_secs);
        loop {
            if local.readiness.check(local.port).await {
                return Ok(started.elapsed());
            }
            if !self.supervisor.exists(service.as_str()).await? {
                return Err(LifecycleError::Exited(service));
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(LifecycleError::NotReady { service, waited });
            }
            tokio::time::sleep(self.config.readiness_poll).await;
        }
    }

    fn render_start_command(&self, local: &LocalService, capture: &Path) -> String {
        let agent = format!(
            "-javaagent:{}=destfile={},append=true,output=file",
            self.config.jacoco.agent_jar.display(),
            capture.display()
        );
        local
            .start_command
            .replace("{agent}", &agent)
            .replace("{port}", &local.port.to_string())
    }
}

fn clear_capture(capture: &Path) -> Result<(), LifecycleError> {
    if let Some(parent) = capture.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(capture) {
        Ok(()) => {
            tracing::debug!(path = %capture.display(), "Removed previous coverage capture");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Remote services have no lifecycle
    #[error("{0} is not a local service")]
    NotLocal(ServiceId),

    /// Another run holds the service
    #[error("{0} is already in use by another run")]
    Busy(ServiceId),

    /// Something else listens on the service port
    #[error("port {port} for {service} is already in use")]
    PortInUse {
        /// Service id
        service: ServiceId,
        /// Port
        port: u16,
    },

    /// Readiness probe never succeeded
    #[error("{service} not ready after {waited:?}")]
    NotReady {
        /// Service id
        service: ServiceId,
        /// Time spent waiting
        waited: Duration,
    },

    /// The session died before becoming ready
    #[error("{0} exited before becoming ready")]
    Exited(ServiceId),

    /// Session creation refused
    #[error("failed to launch session {session}: {message}")]
    Launch {
        /// Session name
        session: String,
        /// Supervisor message
        message: String,
    },

    /// A helper process could not be spawned
    #[error("failed to run '{command}': {source}")]
    Spawn {
        /// Command line
        command: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Auxiliary store command failed
    #[error("auxiliary store {name} command failed with {status}")]
    Auxiliary {
        /// Store name
        name: String,
        /// Exit status
        status: ExitStatus,
    },

    /// Service stop hook failed
    #[error("stop command failed with {status}")]
    StopCommand {
        /// Exit status
        status: ExitStatus,
    },

    /// Lock file unusable
    #[error("failed to lock {path}: {source}")]
    Lock {
        /// Lock file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
