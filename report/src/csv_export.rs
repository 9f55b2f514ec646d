//! CSV export functionality

use std::path::Path;

use anyhow::Result;
use csv::Writer;
use rest_bench_core::AggregationReport;

use crate::table::{cells, Cell, COLUMNS};

/// One row per aggregated run, unreported values left blank
pub struct CsvExporter;

impl CsvExporter {
    /// Export rows to a CSV file
    pub fn export(report: &AggregationReport, path: &Path) -> Result<()> {
        let mut wtr = Writer::from_path(path)?;
        Self::write(report, &mut wtr)?;
        wtr.flush()?;
        Ok(())
    }

    /// Write headers and rows to any CSV writer
    pub fn write<W: std::io::Write>(report: &AggregationReport, wtr: &mut Writer<W>) -> Result<()> {
        wtr.write_record(COLUMNS)?;
        for row in &report.rows {
            let record: Vec<String> = cells(row).iter().map(Cell::render).collect();
            wtr.write_record(&record)?;
        }
        Ok(())
    }
}
