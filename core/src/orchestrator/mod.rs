//! Run orchestration
//!
//! The Orchestrator composes one run of a tool against a service:
//! - validating identifiers and resolving the budget before any side effect
//! - starting the service when it is local
//! - dispatching the tool and waiting for it
//! - stopping the service and rendering coverage
//! - recording the run in `run.json`
//!
//! # Example
//!
//! ```ignore
//! use rest_bench_core::{OrchestratorBuilder, RunRequest, ServiceId, ToolId};
//!
//! let orchestrator = OrchestratorBuilder::new()
//!     .config(config)
//!     .container_dispatcher()
//!     .build()?;
//!
//! let report = orchestrator
//!     .run_with_signal_handling(RunRequest {
//!         service: ServiceId::GenomeNexus,
//!         tool: ToolId::Restifai,
//!         budget: None,
//!     })
//!     .await?;
//! ```

mod builder;
mod executor;

pub use builder::OrchestratorBuilder;
pub use executor::{Orchestrator, RunPlan, RunReport, RunRequest};

#[cfg(test)]
mod tests;
