//! Console summary

use std::fmt::Write;

use rest_bench_core::{AggregationReport, Summary};

const RULE_WIDTH: usize = 70;

/// `1234567` -> `1,234,567`
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Totals block followed by the skipped runs, if any
pub fn render_summary(report: &AggregationReport) -> String {
    let mut out = String::new();
    let rule = "=".repeat(RULE_WIDTH);
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "EVALUATION SUMMARY");
    let _ = writeln!(out, "{rule}");
    write_totals(&mut out, &report.summary);

    if !report.skipped.is_empty() {
        let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
        let _ = writeln!(out, "Skipped runs:");
        for skipped in &report.skipped {
            let _ = writeln!(out, "  {}/{}: {}", skipped.service, skipped.tool, skipped.reason);
        }
    }
    let _ = writeln!(out, "{rule}");
    out
}

fn write_totals(out: &mut String, summary: &Summary) {
    let _ = writeln!(out, "Runs Aggregated: {} (skipped: {})", summary.rows, summary.skipped);
    let _ = writeln!(out, "Total Tests Executed: {}", group_thousands(summary.total_tests));
    let _ = writeln!(out, "Total Failed Tests: {}", group_thousands(summary.total_failed));
    let _ = writeln!(out, "Total Tokens Used: {}", group_thousands(summary.total_tokens));
    let _ = writeln!(out, "Total Cost: ${:.4}", summary.total_cost);
    match summary.overall_success_rate() {
        Some(rate) => {
            let _ = writeln!(out, "Overall Success Rate: {rate:.2}%");
        }
        None => {
            let _ = writeln!(out, "Overall Success Rate: n/a");
        }
    }
}
