//! Container command lines

use std::path::Path;
use std::time::Duration;

use super::{DispatchError, DispatchRequest};
use crate::budget::TimeBudget;
use crate::catalog::{BudgetDiscipline, ServiceId, ToolId, ToolSpec};
use crate::config::HarnessConfig;

/// Mount point of the specs directory inside every tool container
pub const SPECS_MOUNT: &str = "/specs";

/// A fully expanded command line
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Program to execute
    pub program: String,
    /// Its arguments
    pub args: Vec<String>,
    /// Container name, used to kill the container out of band
    pub container: String,
    /// Kill the tool after this long
    pub deadline: Duration,
}

impl Invocation {
    /// Printable command line
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Deterministic container name for `(service, tool)`
pub fn container_name(service: ServiceId, tool: ToolId) -> String {
    format!("rest-bench-{service}-{tool}")
}

/// Build the `<runtime> run` command line for `request`
pub fn build_invocation(
    config: &HarnessConfig,
    tool: &ToolSpec,
    request: &DispatchRequest,
) -> Result<Invocation, DispatchError> {
    match (tool.discipline, request.budget) {
        (BudgetDiscipline::SelfTerminating, TimeBudget::BudgetBound(_)) => {
            return Err(DispatchError::BudgetNotAccepted(request.tool))
        }
        (BudgetDiscipline::BudgetBound, TimeBudget::SelfTerminating) => {
            return Err(DispatchError::BudgetRequired(request.tool))
        }
        _ => {}
    }

    let container = container_name(request.service, request.tool);
    let run_dir = std::path::absolute(&request.run_dir)?;
    let specs_dir = std::path::absolute(&config.specs_dir)?;

    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        container.clone(),
    ];
    if let Some(network) = &config.network {
        args.push("--network".into());
        args.push(network.clone());
    }
    args.push("-v".into());
    args.push(mount(&run_dir, &tool.output_mount, false));
    args.push("-v".into());
    args.push(mount(&specs_dir, SPECS_MOUNT, true));
    for var in &tool.env {
        // Name only: the runtime copies the value from our environment.
        args.push("-e".into());
        args.push(var.clone());
    }
    args.push(tool.image.clone());
    for arg in &tool.args {
        args.push(expand(arg, tool, request)?);
    }

    Ok(Invocation {
        program: config.container_runtime.clone(),
        args,
        container,
        deadline: request.budget.deadline(tool),
    })
}

fn mount(host: &Path, guest: &str, read_only: bool) -> String {
    if read_only {
        format!("{}:{guest}:ro", host.display())
    } else {
        format!("{}:{guest}", host.display())
    }
}

fn expand(template: &str, tool: &ToolSpec, request: &DispatchRequest) -> Result<String, DispatchError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(len) = rest[open..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        let name = &rest[open + 1..open + len];
        let value = match name {
            "base_url" => request.base_url.clone(),
            "service" => request.service.to_string(),
            "spec" => format!("{SPECS_MOUNT}/{}", request.spec_file),
            "output" => tool.output_mount.clone(),
            "budget" => request
                .budget
                .seconds()
                .ok_or(DispatchError::BudgetNotAccepted(request.tool))?
                .to_string(),
            other => {
                return Err(DispatchError::Placeholder {
                    tool: request.tool,
                    placeholder: other.to_string(),
                })
            }
        };
        out.push_str(&value);
        rest = &rest[open + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
