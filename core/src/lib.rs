//! rest-bench-core: Orchestration and metrics aggregation for REST API testing tools
//!
//! This crate drives one testing tool against one target service at a time and
//! turns what the tools leave behind into comparable rows, including:
//!
//! - Service and tool catalog, configuration and time budgets
//! - Local service lifecycle with readiness probing and single-instance leases
//! - Containerized tool dispatch with deadlines
//! - JaCoCo coverage snapshots
//! - Result normalization and aggregation over the results tree
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod budget;
pub mod catalog;
pub mod config;
pub mod coverage;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod metrics;
pub mod orchestrator;

pub use aggregator::{aggregate, AggregateError, AggregatedRow, AggregationReport, SkipReason, SkippedRun, Summary};
pub use budget::{resolve_budget, BudgetSource, ResolvedBudget, TimeBudget};
pub use catalog::{BudgetDiscipline, Catalog, ServiceId, ServiceKind, ServiceSpec, ToolId, ToolSpec};
pub use config::{ConfigError, HarnessConfig, SupervisorKind};
pub use coverage::{CoverageError, CoverageReport, CoverageReporter, CoverageSnapshot};
pub use dispatch::{DispatchError, DispatchOutcome, DispatchRequest, ToolDispatcher};
pub use error::*;
pub use lifecycle::{LifecycleError, ServiceLifecycle};
pub use manifest::RunManifest;
pub use metrics::{ResultError, ResultRecord};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunPlan, RunReport, RunRequest};
