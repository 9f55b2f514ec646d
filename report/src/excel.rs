//! Excel export functionality

use std::path::Path;

use anyhow::Result;
use rest_bench_core::AggregationReport;
use rust_xlsxwriter::*;

use crate::table::{cells, Cell, COLUMNS};

/// Workbook with a results sheet, a summary sheet and a skipped-runs sheet
pub struct ExcelExporter;

impl ExcelExporter {
    /// Export the report to an `.xlsx` file
    pub fn export(report: &AggregationReport, path: &Path) -> Result<()> {
        let mut workbook = Workbook::new();

        let results_sheet = workbook.add_worksheet();
        results_sheet.set_name("Results")?;
        Self::write_results(results_sheet, report)?;

        let summary_sheet = workbook.add_worksheet();
        summary_sheet.set_name("Summary")?;
        Self::write_summary(summary_sheet, report)?;

        let skipped_sheet = workbook.add_worksheet();
        skipped_sheet.set_name("Skipped")?;
        Self::write_skipped(skipped_sheet, report)?;

        workbook.save(path)?;
        Ok(())
    }

    fn write_results(sheet: &mut Worksheet, report: &AggregationReport) -> Result<()> {
        let bold = Format::new().set_bold();
        let percent_format = Format::new().set_num_format("0.00");

        for (col, header) in COLUMNS.iter().enumerate() {
            sheet.write_with_format(0, col as u16, *header, &bold)?;
        }

        for (idx, row) in report.rows.iter().enumerate() {
            let r = (idx + 1) as u32;
            for (col, cell) in cells(row).into_iter().enumerate() {
                let c = col as u16;
                match cell {
                    Cell::Text(text) => {
                        sheet.write(r, c, text)?;
                    }
                    Cell::Count(n) => {
                        sheet.write(r, c, n as f64)?;
                    }
                    Cell::Number(v) => {
                        sheet.write(r, c, v)?;
                    }
                    Cell::Percent(v) => {
                        sheet.write_with_format(r, c, v, &percent_format)?;
                    }
                    Cell::Flag(b) => {
                        sheet.write(r, c, if b { "Yes" } else { "No" })?;
                    }
                    Cell::Empty => {}
                }
            }
        }

        sheet.set_column_width(0, 16)?;
        sheet.set_column_width(1, 14)?;
        for col in 2..COLUMNS.len() as u16 {
            sheet.set_column_width(col, 20)?;
        }

        Ok(())
    }

    fn write_summary(sheet: &mut Worksheet, report: &AggregationReport) -> Result<()> {
        let summary = &report.summary;
        let bold = Format::new().set_bold();
        let number_format = Format::new().set_num_format("0.00");
        let cost_format = Format::new().set_num_format("$0.0000");

        sheet.write_with_format(0, 0, "Metric", &bold)?;
        sheet.write_with_format(0, 1, "Value", &bold)?;

        let mut row = 1u32;

        sheet.write(row, 0, "Runs Aggregated")?;
        sheet.write(row, 1, summary.rows as f64)?;
        row += 1;

        sheet.write(row, 0, "Runs Skipped")?;
        sheet.write(row, 1, summary.skipped as f64)?;
        row += 1;

        sheet.write(row, 0, "Total Tests Executed")?;
        sheet.write(row, 1, summary.total_tests as f64)?;
        row += 1;

        sheet.write(row, 0, "Total Failed Tests")?;
        sheet.write(row, 1, summary.total_failed as f64)?;
        row += 1;

        sheet.write(row, 0, "Total Tokens Used")?;
        sheet.write(row, 1, summary.total_tokens as f64)?;
        row += 1;

        sheet.write(row, 0, "Total Cost")?;
        sheet.write_with_format(row, 1, summary.total_cost, &cost_format)?;
        row += 1;

        sheet.write(row, 0, "Overall Success Rate (%)")?;
        if let Some(rate) = summary.overall_success_rate() {
            sheet.write_with_format(row, 1, rate, &number_format)?;
        }

        sheet.set_column_width(0, 26)?;
        sheet.set_column_width(1, 15)?;

        Ok(())
    }

    fn write_skipped(sheet: &mut Worksheet, report: &AggregationReport) -> Result<()> {
        let bold = Format::new().set_bold();

        for (col, header) in ["Service", "Tool", "Directory", "Reason"].iter().enumerate() {
            sheet.write_with_format(0, col as u16, *header, &bold)?;
        }

        for (idx, skipped) in report.skipped.iter().enumerate() {
            let row = (idx + 1) as u32;
            sheet.write(row, 0, skipped.service.as_str())?;
            sheet.write(row, 1, skipped.tool.as_str())?;
            sheet.write(row, 2, skipped.path.display().to_string())?;
            sheet.write(row, 3, skipped.reason.to_string())?;
        }

        sheet.set_column_width(0, 16)?;
        sheet.set_column_width(1, 14)?;
        sheet.set_column_width(2, 45)?;
        sheet.set_column_width(3, 40)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rest_bench_core::{AggregatedRow, ResultRecord, SkipReason, SkippedRun};
    use std::path::PathBuf;

    #[test]
    fn test_export_creates_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evaluation.xlsx");
        let report = AggregationReport {
            rows: vec![AggregatedRow {
                service: "language-tool".into(),
                tool: "logiagent".into(),
                record: ResultRecord {
                    successful_operations: Some(3),
                    total_tests: Some(10),
                    failed_tests: Some(2),
                    ..ResultRecord::default()
                },
                coverage: None,
                coverage_snapshot: None,
                artifact: PathBuf::from("logs/results.json"),
                exit_code: Some(0),
                timed_out: false,
            }],
            skipped: vec![SkippedRun {
                service: "fdic".into(),
                tool: "schemathesis".into(),
                path: PathBuf::from("results/fdic/schemathesis"),
                reason: SkipReason::UnknownTool,
            }],
            ..AggregationReport::default()
        };

        ExcelExporter::export(&report, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // xlsx is a zip container
        assert_eq!(&bytes[..2], b"PK");
    }
}
