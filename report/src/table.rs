//! Column layout shared by the tabular writers

use rest_bench_core::AggregatedRow;

/// Column headers, in output order
pub const COLUMNS: [&str; 18] = [
    "Service",
    "Tool",
    "Successful Operations",
    "Server Errors",
    "Total Tokens",
    "Total Cost",
    "Total Tests",
    "Failed Tests",
    "Passed Tests",
    "Error Rate",
    "Success Rate",
    "Execution Time",
    "Instruction Coverage",
    "Branch Coverage",
    "Line Coverage",
    "Method Coverage",
    "Overall Coverage",
    "Timed Out",
];

/// One typed cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Free text
    Text(String),
    /// Integer count
    Count(u64),
    /// Plain decimal (cost, seconds)
    Number(f64),
    /// Percentage, rendered with two decimals
    Percent(f64),
    /// Yes/no flag
    Flag(bool),
    /// Value not reported
    Empty,
}

impl Cell {
    /// Text form used by CSV and the console
    pub fn render(&self) -> String {
        match self {
            Cell::Text(text) => text.clone(),
            Cell::Count(n) => n.to_string(),
            Cell::Number(v) => v.to_string(),
            Cell::Percent(v) => format!("{v:.2}"),
            Cell::Flag(b) => b.to_string(),
            Cell::Empty => String::new(),
        }
    }
}

fn count(value: Option<u64>) -> Cell {
    value.map_or(Cell::Empty, Cell::Count)
}

fn number(value: Option<f64>) -> Cell {
    value.map_or(Cell::Empty, Cell::Number)
}

fn percent(value: Option<f64>) -> Cell {
    value.map_or(Cell::Empty, Cell::Percent)
}

/// Cells of `row` in [`COLUMNS`] order
pub fn cells(row: &AggregatedRow) -> Vec<Cell> {
    let record = &row.record;
    let coverage = row.coverage.unwrap_or_default();
    vec![
        Cell::Text(row.service.clone()),
        Cell::Text(row.tool.clone()),
        count(record.successful_operations),
        count(record.server_errors),
        count(record.total_tokens),
        number(record.total_cost),
        count(record.total_tests),
        count(record.failed_tests),
        count(record.passed()),
        percent(record.error_rate()),
        percent(record.success_rate()),
        number(record.execution_time_secs),
        percent(coverage.instruction),
        percent(coverage.branch),
        percent(coverage.line),
        percent(coverage.method),
        percent(row.overall_coverage()),
        Cell::Flag(row.timed_out),
    ]
}
