//! Time budgets
//!
//! Tools either stop on their own once every operation has been attempted,
//! or take an explicit number of seconds. For a fair comparison the
//! self-terminating tool's measured duration on a service becomes the budget
//! of every budget-bound tool on that service.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{BudgetDiscipline, ServiceId, ToolId, ToolSpec};
use crate::config::{ConfigError, HarnessConfig};
use crate::manifest::RunManifest;
use crate::metrics::{latest_result_artifact, read_raw_duration};

/// Budget handed to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "discipline", content = "seconds", rename_all = "snake_case")]
pub enum TimeBudget {
    /// Runs until every operation has been attempted
    SelfTerminating,
    /// Must stop at or shortly after this many seconds
    BudgetBound(u64),
}

impl TimeBudget {
    /// Seconds to substitute for `{budget}`, if any
    pub fn seconds(&self) -> Option<u64> {
        match self {
            TimeBudget::SelfTerminating => None,
            TimeBudget::BudgetBound(secs) => Some(*secs),
        }
    }

    /// Hard deadline after which the dispatcher kills the tool
    pub fn deadline(&self, tool: &ToolSpec) -> Duration {
        match self {
            TimeBudget::SelfTerminating => Duration::from_secs(tool.max_duration_secs),
            TimeBudget::BudgetBound(secs) => {
                Duration::from_secs(secs.saturating_add(tool.grace_secs))
            }
        }
    }
}

impl fmt::Display for TimeBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBudget::SelfTerminating => f.write_str("self-terminating"),
            TimeBudget::BudgetBound(secs) => write!(f, "{secs}s"),
        }
    }
}

/// Where a budget came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BudgetSource {
    /// The tool needs none
    NotApplicable,
    /// Given on the command line
    Explicit,
    /// Measured by the self-terminating tool on the same service
    Measured {
        /// Artifact the duration was read from
        path: PathBuf,
    },
    /// Fallback from the catalog
    Catalog,
}

/// A budget together with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBudget {
    /// The budget
    pub budget: TimeBudget,
    /// Its provenance
    pub source: BudgetSource,
}

/// Resolve the budget for `(service, tool)` without side effects
///
/// Budget-bound order: explicit value, measured reference, catalog reference.
/// An explicit value must lie within the tool's `max_duration_secs`.
pub fn resolve_budget(
    config: &HarnessConfig,
    service: ServiceId,
    tool: ToolId,
    explicit: Option<u64>,
) -> Result<ResolvedBudget, ConfigError> {
    let tool_spec = config.catalog.tool(tool)?;
    let service_spec = config.catalog.service(service)?;

    if tool_spec.discipline == BudgetDiscipline::SelfTerminating {
        if let Some(secs) = explicit {
            tracing::warn!(tool = %tool, budget_secs = secs, "Ignoring budget for self-terminating tool");
        }
        return Ok(ResolvedBudget {
            budget: TimeBudget::SelfTerminating,
            source: BudgetSource::NotApplicable,
        });
    }

    if let Some(secs) = explicit {
        if secs == 0 {
            return Err(ConfigError::Invalid("budget must be at least one second".into()));
        }
        if secs > tool_spec.max_duration_secs {
            return Err(ConfigError::Invalid(format!(
                "budget of {secs}s exceeds the {}s ceiling for {tool}",
                tool_spec.max_duration_secs
            )));
        }
        return Ok(ResolvedBudget {
            budget: TimeBudget::BudgetBound(secs),
            source: BudgetSource::Explicit,
        });
    }

    if let Some(reference) = config.catalog.reference_tool() {
        if let Some((secs, path)) = measured_reference(&config.run_dir(service, reference)) {
            tracing::info!(
                service = %service,
                reference = %reference,
                budget_secs = secs,
                path = %path.display(),
                "Using measured reference budget"
            );
            return Ok(ResolvedBudget {
                budget: TimeBudget::BudgetBound(secs),
                source: BudgetSource::Measured { path },
            });
        }
    }

    match service_spec.reference_budget_secs {
        Some(secs) if secs > 0 => Ok(ResolvedBudget {
            budget: TimeBudget::BudgetBound(secs),
            source: BudgetSource::Catalog,
        }),
        _ => Err(ConfigError::MissingBudget {
            service,
            tool,
        }),
    }
}

/// Duration measured in a self-terminating tool's run directory
///
/// Prefers the duration reported in the result artifact and falls back to the
/// elapsed time of a completed run manifest. Fractions round up.
pub fn measured_reference(run_dir: &Path) -> Option<(u64, PathBuf)> {
    if let Some(artifact) = latest_result_artifact(run_dir) {
        match read_raw_duration(&artifact) {
            Ok(Some(secs)) if secs > 0.0 => return Some((secs.ceil() as u64, artifact)),
            Ok(_) => {}
            Err(e) => tracing::warn!(path = %artifact.display(), error = %e, "Unreadable reference artifact"),
        }
    }

    match RunManifest::read(run_dir) {
        Ok(Some(manifest)) if manifest.is_complete() && !manifest.interrupted => manifest
            .elapsed_secs
            .filter(|secs| *secs > 0.0)
            .map(|secs| (secs.ceil() as u64, RunManifest::path(run_dir))),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(dir = %run_dir.display(), error = %e, "Unreadable reference manifest");
            None
        }
    }
}
