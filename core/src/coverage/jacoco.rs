//! JaCoCo report rendering and parsing

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::{
    create_snapshot_dir, CoverageError, CoverageReport, CoverageReporter, CoverageRequest,
    CoverageSnapshot, TIMESTAMP_FORMAT,
};
use crate::config::JacocoConfig;

/// Summary file written next to the rendered report
pub const SUMMARY_FILE: &str = "coverage.json";

/// Renders reports with `jacococli.jar report`
#[derive(Debug, Clone)]
pub struct JacocoReporter {
    java: String,
    cli_jar: std::path::PathBuf,
}

impl JacocoReporter {
    /// Reporter using the configured launcher and CLI jar
    pub fn new(config: &JacocoConfig) -> Self {
        Self {
            java: config.java.clone(),
            cli_jar: config.cli_jar.clone(),
        }
    }
}

#[async_trait]
impl CoverageReporter for JacocoReporter {
    async fn report(&self, request: &CoverageRequest) -> Result<CoverageSnapshot, CoverageError> {
        check_capture(&request.capture)?;

        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let (timestamp, directory) = create_snapshot_dir(&request.output_root, &timestamp)?;
        let html_dir = directory.join("jacoco");
        let xml_file = directory.join("jacoco.xml");

        tracing::info!(
            service = %request.service,
            tool = %request.tool,
            snapshot = %timestamp,
            "Rendering coverage report"
        );

        let mut command = Command::new(&self.java);
        command
            .arg("-jar")
            .arg(&self.cli_jar)
            .arg("report")
            .arg(&request.capture)
            .arg("--classfiles")
            .arg(&request.classfiles)
            .arg("--html")
            .arg(&html_dir)
            .arg("--xml")
            .arg(&xml_file)
            .stdin(Stdio::null());

        let output = command.output().await.map_err(|source| CoverageError::Spawn {
            command: format!("{} -jar {} report", self.java, self.cli_jar.display()),
            source,
        })?;
        if !output.status.success() {
            // Leave no half-written snapshot behind.
            let _ = std::fs::remove_dir_all(&directory);
            return Err(CoverageError::Tool {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let index = html_dir.join("index.html");
        let html = std::fs::read_to_string(&index)?;
        let report = parse_html_index(&html).ok_or_else(|| CoverageError::Malformed {
            path: index.clone(),
            reason: "no totals row".into(),
        })?;

        let summary = serde_json::to_string_pretty(&report).map_err(|e| CoverageError::Malformed {
            path: directory.join(SUMMARY_FILE),
            reason: e.to_string(),
        })?;
        std::fs::write(directory.join(SUMMARY_FILE), summary)?;

        tracing::debug!(
            instruction = ?report.instruction,
            branch = ?report.branch,
            line = ?report.line,
            method = ?report.method,
            "Coverage parsed"
        );

        Ok(CoverageSnapshot {
            timestamp,
            directory,
            report,
        })
    }
}

fn check_capture(capture: &Path) -> Result<(), CoverageError> {
    match std::fs::metadata(capture) {
        Ok(meta) if meta.len() == 0 => Err(CoverageError::EmptyCapture(capture.to_path_buf())),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(CoverageError::MissingCapture(capture.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn tfoot_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<tfoot>.*?</tfoot>").ok()).as_ref()
}

fn cell_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<td[^>]*>(.*?)</td>").ok()).as_ref()
}

fn percent_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").ok()).as_ref()
}

/// Read the totals row of a JaCoCo `index.html`
///
/// Cell layout: 0 label, 1-2 instructions (bar, %), 3-4 branches (bar, %),
/// 5-6 complexity, 7-8 lines missed/total, 9-10 methods missed/total,
/// 11-12 classes. Returns `None` when the row is absent or too short.
pub fn parse_html_index(html: &str) -> Option<CoverageReport> {
    let tfoot = tfoot_regex()?.find(html)?.as_str();
    let cells: Vec<&str> = cell_regex()?
        .captures_iter(tfoot)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if cells.len() < 13 {
        return None;
    }

    Some(CoverageReport {
        instruction: percent(cells[2]),
        branch: percent(cells[4]),
        line: ratio(cells[7], cells[8]),
        method: ratio(cells[9], cells[10]),
    }
    .within_bounds())
}

fn percent(cell: &str) -> Option<f64> {
    percent_regex()?
        .captures(cell)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn ratio(missed: &str, total: &str) -> Option<f64> {
    let missed = count(missed)?;
    let total = count(total)?;
    if total == 0 || missed > total {
        return None;
    }
    Some((total - missed) as f64 / total as f64 * 100.0)
}

fn count(cell: &str) -> Option<u64> {
    cell.trim().replace(',', "").parse().ok()
}
