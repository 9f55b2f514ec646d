//! Discovery of `results/<service>/<tool>/` directories

use std::path::{Path, PathBuf};

use super::{AggregateError, SkipReason, SkippedRun};

/// Tool name recorded for a service directory that could not be listed
pub const ANY_TOOL: &str = "*";

/// One `<service>/<tool>` directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    /// Service directory name
    pub service: String,
    /// Tool directory name
    pub tool: String,
    /// Full path
    pub path: PathBuf,
}

/// Result of walking the results tree
#[derive(Debug, Default)]
pub struct Discovery {
    /// Run directories, ordered by service then tool
    pub runs: Vec<RunDirectory>,
    /// Service directories that could not be listed
    pub unreadable: Vec<SkippedRun>,
}

/// All run directories below `results_dir`
///
/// Only a missing or unlistable root is an error. A service directory that
/// cannot be listed is reported in [`Discovery::unreadable`] and the walk
/// goes on.
pub fn discover_runs(results_dir: &Path) -> Result<Discovery, AggregateError> {
    if !results_dir.is_dir() {
        return Err(AggregateError::MissingResultsDir(results_dir.to_path_buf()));
    }

    let mut discovery = Discovery::default();
    for (service, service_path) in subdirectories(results_dir)? {
        let tools = subdirectories(&service_path);
        collect_service(&mut discovery, service, service_path, tools);
    }
    discovery
        .runs
        .sort_by(|a, b| (&a.service, &a.tool).cmp(&(&b.service, &b.tool)));
    discovery.unreadable.sort_by(|a, b| a.service.cmp(&b.service));
    Ok(discovery)
}

fn collect_service(
    discovery: &mut Discovery,
    service: String,
    service_path: PathBuf,
    tools: std::io::Result<Vec<(String, PathBuf)>>,
) {
    match tools {
        Ok(tools) => {
            for (tool, path) in tools {
                discovery.runs.push(RunDirectory {
                    service: service.clone(),
                    tool,
                    path,
                });
            }
        }
        Err(e) => {
            tracing::warn!(
                service = %service,
                path = %service_path.display(),
                error = %e,
                "Cannot list service directory"
            );
            discovery.unreadable.push(SkippedRun {
                service,
                tool: ANY_TOOL.to_string(),
                path: service_path,
                reason: SkipReason::Unreadable(e.to_string()),
            });
        }
    }
}

fn subdirectories(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let is_dir = match entry.file_type() {
            Ok(file_type) => file_type.is_dir(),
            Err(_) => entry.path().is_dir(),
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_dir || name.starts_with('.') {
            continue;
        }
        out.push((name, entry.path()));
    }
    Ok(out)
}
