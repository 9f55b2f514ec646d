//! Tests for the Orchestrator module

use super::builder::OrchestratorBuilder;
use super::executor::{Orchestrator, RunRequest};
use crate::budget::{BudgetSource, TimeBudget};
use crate::catalog::{ServiceId, ToolId};
use crate::config::HarnessConfig;
use crate::coverage::{CoverageError, CoverageReport, CoverageReporter, CoverageRequest, CoverageSnapshot};
use crate::dispatch::{DispatchError, DispatchOutcome, DispatchRequest, ToolDispatcher};
use crate::error::BenchError;
use crate::lifecycle::{LifecycleError, ReadinessProbe, SessionSupervisor};
use crate::manifest::RunManifest;

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::TcpListener;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Events = Arc<Mutex<Vec<String>>>;

fn push(events: &Events, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

// ============================================================================
// Mock Supervisor
// ============================================================================

struct MockSupervisor {
    events: Events,
    live: Mutex<HashMap<String, Option<TcpListener>>>,
    bind: bool,
    ports: HashMap<String, u16>,
}

#[async_trait]
impl SessionSupervisor for MockSupervisor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn exists(&self, session: &str) -> Result<bool, LifecycleError> {
        Ok(self.live.lock().unwrap().contains_key(session))
    }

    async fn launch(&self, session: &str, _command: &str) -> Result<(), LifecycleError> {
        push(&self.events, format!("launch {session}"));
        let listener = match (self.bind, self.ports.get(session)) {
            (true, Some(port)) => Some(TcpListener::bind(("127.0.0.1", *port)).unwrap()),
            _ => None,
        };
        self.live.lock().unwrap().insert(session.to_string(), listener);
        Ok(())
    }

    async fn terminate(&self, session: &str) -> Result<bool, LifecycleError> {
        push(&self.events, format!("terminate {session}"));
        Ok(self.live.lock().unwrap().remove(session).is_some())
    }
}

// ============================================================================
// Mock Coverage
// ============================================================================

struct MockCoverage {
    events: Events,
}

#[async_trait]
impl CoverageReporter for MockCoverage {
    async fn report(&self, request: &CoverageRequest) -> Result<CoverageSnapshot, CoverageError> {
        push(&self.events, format!("coverage {}", request.tool));
        Ok(CoverageSnapshot {
            timestamp: "20250101_000000".into(),
            directory: request.output_root.join("20250101_000000"),
            report: CoverageReport::default(),
        })
    }
}

// ============================================================================
// Mock Dispatcher
// ============================================================================

struct MockDispatcher {
    events: Events,
    exit_code: Option<i32>,
    /// Written to `<run_dir>/output/results.json`
    artifact: Option<String>,
    delay: Option<Duration>,
    fail: bool,
}

impl MockDispatcher {
    fn new(events: Events) -> Self {
        Self {
            events,
            exit_code: Some(0),
            artifact: None,
            delay: None,
            fail: false,
        }
    }

    fn with_artifact(mut self, body: &str) -> Self {
        self.artifact = Some(body.to_string());
        self
    }

    fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl ToolDispatcher for MockDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        push(
            &self.events,
            format!("dispatch {} {} {}", request.tool, request.base_url, request.budget),
        );
        if self.fail {
            return Err(DispatchError::Spawn {
                program: "docker".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no runtime"),
            });
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(body) = &self.artifact {
            let output = request.run_dir.join("output");
            std::fs::create_dir_all(&output).unwrap();
            std::fs::write(output.join("results.json"), body).unwrap();
        }
        Ok(DispatchOutcome {
            exit_code: self.exit_code,
            elapsed: Duration::from_millis(5),
            timed_out: false,
            log_file: request.run_dir.join("tool.log"),
        })
    }

    async fn cancel(&self, service: ServiceId, tool: ToolId) {
        push(&self.events, format!("cancel {service} {tool}"));
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Config rooted in `dir` with the language-tool service on a free port
fn test_config(dir: &Path, port: u16) -> HarnessConfig {
    let mut config = HarnessConfig {
        results_dir: dir.join("results"),
        specs_dir: dir.join("specs"),
        state_dir: dir.join("state"),
        readiness_poll: Duration::from_millis(10),
        teardown_settle: Duration::ZERO,
        ..HarnessConfig::default()
    };
    for (id, spec) in config.catalog.services.iter_mut() {
        if let Some(local) = spec.local.as_mut() {
            local.auxiliary = None;
            local.readiness = ReadinessProbe::Tcp;
            local.readiness_timeout_secs = 1;
            if *id == ServiceId::LanguageTool {
                local.port = port;
            }
        }
    }
    if let Some(spec) = config.catalog.services.get_mut(&ServiceId::GenomeNexus) {
        if let Some(local) = spec.local.as_mut() {
            local.port = free_port();
        }
    }
    config
}

fn orchestrator(config: HarnessConfig, dispatcher: MockDispatcher, events: &Events, bind: bool) -> Orchestrator {
    let ports = config
        .catalog
        .services
        .iter()
        .filter_map(|(id, spec)| spec.local.as_ref().map(|l| (id.to_string(), l.port)))
        .collect();
    OrchestratorBuilder::new()
        .config(config)
        .dispatcher(Arc::new(dispatcher))
        .supervisor(Arc::new(MockSupervisor {
            events: Arc::clone(events),
            live: Mutex::new(HashMap::new()),
            bind,
            ports,
        }))
        .coverage(Arc::new(MockCoverage {
            events: Arc::clone(events),
        }))
        .build()
        .unwrap()
}

fn request(service: ServiceId, tool: ToolId, budget: Option<u64>) -> RunRequest {
    RunRequest {
        service,
        tool,
        budget,
    }
}

// ============================================================================
// Builder Tests
// ============================================================================

#[test]
fn test_builder_requires_dispatcher() {
    let err = OrchestratorBuilder::new().build().unwrap_err();
    assert!(err.is_config());
}

#[test]
fn test_builder_rejects_invalid_config() {
    let config = HarnessConfig {
        container_runtime: String::new(),
        ..HarnessConfig::default()
    };
    let events = Events::default();
    let result = OrchestratorBuilder::new()
        .config(config)
        .dispatcher(Arc::new(MockDispatcher::new(events)))
        .build();
    assert!(matches!(result, Err(BenchError::Config(_))));
}

#[test]
fn test_builder_container_dispatcher() {
    let orchestrator = OrchestratorBuilder::new()
        .container_dispatcher()
        .build()
        .unwrap();
    assert_eq!(orchestrator.config().container_runtime, "docker");
}

// ============================================================================
// Run Tests
// ============================================================================

#[tokio::test]
async fn test_remote_run_skips_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let dispatcher = MockDispatcher::new(Arc::clone(&events)).with_artifact(r#"{"successful_operations": 3}"#);
    let orch = orchestrator(test_config(dir.path(), free_port()), dispatcher, &events, true);

    let report = orch
        .run(request(ServiceId::Fdic, ToolId::Logiagent, Some(30)))
        .await
        .unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        ["dispatch logiagent https://banks.data.fdic.gov/api 30s"]
    );
    assert!(report.coverage.is_none());
    assert!(report.plan.run_dir.join("output/results.json").is_file());

    let manifest = RunManifest::read(&report.plan.run_dir).unwrap().unwrap();
    assert!(manifest.is_complete());
    assert_eq!(manifest.exit_code, Some(0));
    assert_eq!(manifest.budget, TimeBudget::BudgetBound(30));
}

#[tokio::test]
async fn test_local_run_orders_start_dispatch_stop_coverage() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let port = free_port();
    let dispatcher = MockDispatcher::new(Arc::clone(&events))
        .with_artifact(r#"{"successful_operations": 10, "time_duration": 74}"#);
    let orch = orchestrator(test_config(dir.path(), port), dispatcher, &events, true);

    let report = orch
        .run(request(ServiceId::LanguageTool, ToolId::Restifai, None))
        .await
        .unwrap();

    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], "launch language-tool");
    assert!(events[1].starts_with("dispatch restifai http://localhost:9003/v2"));
    assert_eq!(events[2], "terminate language-tool");
    assert_eq!(events[3], "coverage restifai");

    assert!(matches!(report.coverage, Some(Ok(_))));
    assert!(report.manifest.coverage_dir.is_some());
    // The port is free again once the run returns.
    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
}

#[tokio::test]
async fn test_rerun_leaves_one_listener() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let port = free_port();
    let orch = orchestrator(
        test_config(dir.path(), port),
        MockDispatcher::new(Arc::clone(&events)),
        &events,
        true,
    );

    for _ in 0..2 {
        orch.run(request(ServiceId::LanguageTool, ToolId::Restifai, None))
            .await
            .unwrap();
    }

    let launches = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("launch"))
        .count();
    assert_eq!(launches, 2);
    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
}

#[tokio::test]
async fn test_config_error_has_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let mut config = test_config(dir.path(), free_port());
    if let Some(spec) = config.catalog.services.get_mut(&ServiceId::Ohsome) {
        spec.reference_budget_secs = None;
    }
    let orch = orchestrator(config, MockDispatcher::new(Arc::clone(&events)), &events, true);

    let err = orch
        .run(request(ServiceId::Ohsome, ToolId::Autoresttest, None))
        .await
        .unwrap_err();

    assert!(err.is_config());
    assert!(events.lock().unwrap().is_empty());
    assert!(!dir.path().join("results").exists());
}

#[tokio::test]
async fn test_tool_failure_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let dispatcher = MockDispatcher::new(Arc::clone(&events)).with_exit_code(2);
    let orch = orchestrator(test_config(dir.path(), free_port()), dispatcher, &events, true);

    let report = orch
        .run(request(ServiceId::RestCountries, ToolId::Autoresttest, Some(5)))
        .await
        .unwrap();

    assert_eq!(report.outcome.exit_code, Some(2));
    assert!(!report.outcome.success());
    assert_eq!(report.manifest.exit_code, Some(2));
}

#[tokio::test]
async fn test_readiness_failure_skips_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let orch = orchestrator(
        test_config(dir.path(), free_port()),
        MockDispatcher::new(Arc::clone(&events)),
        &events,
        false,
    );

    let err = orch
        .run(request(ServiceId::LanguageTool, ToolId::Logiagent, Some(5)))
        .await
        .unwrap_err();

    assert!(matches!(err, BenchError::Lifecycle(LifecycleError::NotReady { .. })));
    let events = events.lock().unwrap().clone();
    assert!(events.iter().all(|e| !e.starts_with("dispatch")));
    assert_eq!(events.last().unwrap(), "terminate language-tool");

    let manifest = RunManifest::read(&dir.path().join("results/language-tool/logiagent"))
        .unwrap()
        .unwrap();
    assert!(manifest.is_complete());
    assert!(manifest.error.is_some());
}

#[tokio::test]
async fn test_dispatch_error_still_stops_service() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let orch = orchestrator(
        test_config(dir.path(), free_port()),
        MockDispatcher::new(Arc::clone(&events)).failing(),
        &events,
        true,
    );

    let err = orch
        .run(request(ServiceId::LanguageTool, ToolId::Autoresttest, Some(5)))
        .await
        .unwrap_err();

    assert!(matches!(err, BenchError::Dispatch(_)));
    assert!(events
        .lock()
        .unwrap()
        .contains(&"terminate language-tool".to_string()));
}

#[tokio::test]
async fn test_shutdown_kills_tool_and_service() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let dispatcher = MockDispatcher::new(Arc::clone(&events)).with_delay(Duration::from_secs(30));
    let orch = orchestrator(test_config(dir.path(), free_port()), dispatcher, &events, true);

    let (result, _) = tokio::join!(
        orch.run(request(ServiceId::LanguageTool, ToolId::Logiagent, Some(60))),
        async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            orch.shutdown();
        }
    );

    assert!(matches!(result, Err(BenchError::Interrupted)));
    let events = events.lock().unwrap().clone();
    let cancel = events.iter().position(|e| e == "cancel language-tool logiagent").unwrap();
    let terminate = events.iter().position(|e| e == "terminate language-tool").unwrap();
    assert!(cancel < terminate);

    let manifest = RunManifest::read(&dir.path().join("results/language-tool/logiagent"))
        .unwrap()
        .unwrap();
    assert!(manifest.interrupted);
    assert!(manifest.is_complete());
}

#[tokio::test]
async fn test_measured_duration_becomes_budget() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let dispatcher = MockDispatcher::new(Arc::clone(&events))
        .with_artifact(r#"{"successful_operations": 21, "time_duration": 42}"#);
    let orch = orchestrator(test_config(dir.path(), free_port()), dispatcher, &events, true);

    orch.run(request(ServiceId::Fdic, ToolId::Restifai, Some(999)))
        .await
        .unwrap();
    let plan = orch
        .plan(request(ServiceId::Fdic, ToolId::Autoresttest, None))
        .unwrap();

    assert_eq!(plan.budget.budget, TimeBudget::BudgetBound(42));
    assert!(matches!(plan.budget.source, BudgetSource::Measured { .. }));
    // The self-terminating run itself ignored the explicit budget.
    assert!(events.lock().unwrap()[0].ends_with("self-terminating"));
}

#[tokio::test]
async fn test_busy_service_rejected_while_run_active() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let config = test_config(dir.path(), free_port());
    let first = orchestrator(
        config.clone(),
        MockDispatcher::new(Arc::clone(&events)).with_delay(Duration::from_millis(500)),
        &events,
        true,
    );
    let second = orchestrator(config, MockDispatcher::new(Arc::clone(&events)), &events, true);

    let (a, b) = tokio::join!(
        first.run(request(ServiceId::LanguageTool, ToolId::Autoresttest, Some(5))),
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            second
                .run(request(ServiceId::LanguageTool, ToolId::Logiagent, Some(5)))
                .await
        }
    );

    assert!(a.is_ok());
    assert!(matches!(
        b,
        Err(BenchError::Lifecycle(LifecycleError::Busy(ServiceId::LanguageTool)))
    ));
}

#[tokio::test]
async fn test_same_remote_pair_never_dispatches_twice() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let dispatcher = MockDispatcher::new(Arc::clone(&events)).with_delay(Duration::from_millis(400));
    let orch = orchestrator(test_config(dir.path(), free_port()), dispatcher, &events, true);

    let (a, b) = tokio::join!(
        orch.run(request(ServiceId::Fdic, ToolId::Logiagent, Some(5))),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            orch.run(request(ServiceId::Fdic, ToolId::Logiagent, Some(5))).await
        }
    );

    assert!(a.is_ok());
    assert!(matches!(
        b,
        Err(BenchError::RunInProgress {
            service: ServiceId::Fdic,
            tool: ToolId::Logiagent
        })
    ));
    let dispatches = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("dispatch"))
        .count();
    assert_eq!(dispatches, 1);

    // Released once the first run returns.
    orch.run(request(ServiceId::Fdic, ToolId::Logiagent, Some(5)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejected_duplicate_keeps_live_manifest_in_progress() {
    let dir = tempfile::tempdir().unwrap();
    let events = Events::default();
    let config = test_config(dir.path(), free_port());
    let run_dir = config.run_dir(ServiceId::LanguageTool, ToolId::Autoresttest);
    let first = orchestrator(
        config.clone(),
        MockDispatcher::new(Arc::clone(&events)).with_delay(Duration::from_millis(500)),
        &events,
        true,
    );
    let second = orchestrator(config, MockDispatcher::new(Arc::clone(&events)), &events, true);

    let (a, (b, manifest)) = tokio::join!(
        first.run(request(ServiceId::LanguageTool, ToolId::Autoresttest, Some(5))),
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let b = second
                .run(request(ServiceId::LanguageTool, ToolId::Autoresttest, Some(5)))
                .await;
            (b, RunManifest::read(&run_dir).unwrap().unwrap())
        }
    );

    assert!(a.is_ok());
    assert!(matches!(b, Err(BenchError::RunInProgress { .. })));
    assert!(!manifest.is_complete());
    assert!(manifest.error.is_none());
    assert!(RunManifest::read(&run_dir).unwrap().unwrap().is_complete());
}
