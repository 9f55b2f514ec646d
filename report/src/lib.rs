//! Report generation for aggregated rest-bench results
//!
//! This crate provides writers for:
//!
//! - CSV (one row per run, blank cells for unreported values)
//! - JSON (rows with derived columns, summary and skipped runs)
//! - Excel workbooks (xlsx)
//! - The console summary
//!
//! The format is picked from the output file's extension:
//!
//! ```ignore
//! let report = rest_bench_core::aggregate(Path::new("results"))?;
//! let written = write_report(&report, Path::new("output/evaluation_results.csv"))?;
//! print!("{}", render_summary(&report));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod csv_export;
pub mod excel;
pub mod json_export;
pub mod summary;
pub mod table;

pub use csv_export::CsvExporter;
pub use excel::ExcelExporter;
pub use json_export::JsonExporter;
pub use summary::{group_thousands, render_summary};

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rest_bench_core::AggregationReport;

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Comma-separated values
    Csv,
    /// Pretty-printed JSON
    Json,
    /// Excel workbook
    Excel,
}

impl ReportFormat {
    /// Format for `path`; anything other than `.json` or `.xlsx` is CSV
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => ReportFormat::Json,
            Some("xlsx") => ReportFormat::Excel,
            _ => ReportFormat::Csv,
        }
    }
}

/// `dir/name.ext` -> `dir/name_<stamp>.ext`
pub fn timestamped_path(path: &Path, stamp: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{stamp}"),
    };
    path.with_file_name(name)
}

/// Write `report` to `path`, creating its parent directory
pub fn write_report(report: &AggregationReport, path: &Path) -> Result<ReportFormat> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let format = ReportFormat::from_path(path);
    match format {
        ReportFormat::Csv => CsvExporter::export(report, path),
        ReportFormat::Json => JsonExporter::export(report, path),
        ReportFormat::Excel => ExcelExporter::export(report, path),
    }
    .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ReportFormat::from_path(Path::new("out/eval.csv")), ReportFormat::Csv);
        assert_eq!(ReportFormat::from_path(Path::new("out/eval.JSON")), ReportFormat::Json);
        assert_eq!(ReportFormat::from_path(Path::new("eval.xlsx")), ReportFormat::Excel);
        assert_eq!(ReportFormat::from_path(Path::new("eval")), ReportFormat::Csv);
    }

    #[test]
    fn test_timestamped_path() {
        assert_eq!(
            timestamped_path(Path::new("output/evaluation_results.csv"), "20250101_120000"),
            PathBuf::from("output/evaluation_results_20250101_120000.csv")
        );
        assert_eq!(
            timestamped_path(Path::new("report"), "20250101_120000"),
            PathBuf::from("report_20250101_120000")
        );
    }

    #[test]
    fn test_write_report_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/output/results.json");
        let format = write_report(&AggregationReport::default(), &path).unwrap();
        assert_eq!(format, ReportFormat::Json);
        assert!(path.is_file());
    }
}
