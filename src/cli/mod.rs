//! CLI argument parsing and command handling

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rest_bench_core::{
    aggregate, HarnessConfig, OrchestratorBuilder, RunReport, RunRequest, ServiceId, ServiceKind,
    ToolId,
};
use rest_bench_report::{render_summary, timestamped_path, write_report};

const RULE_WIDTH: usize = 70;

/// rest-bench - Run REST API testing tools against services and compare them
#[derive(Parser, Debug)]
#[command(name = "rest-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one tool against one service
    Run {
        /// Tool to run (restifai, autoresttest, logiagent)
        #[arg(short, long)]
        tool: ToolId,

        /// Target service (genome-nexus, language-tool, fdic, ohsome, rest-countries)
        #[arg(short, long)]
        service: ServiceId,

        /// Time budget in seconds for budget-bound tools
        #[arg(short, long)]
        budget: Option<u64>,

        /// Configuration file overriding the built-in catalog
        #[arg(short, long, env = "REST_BENCH_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Aggregate every run below the results directory into one table
    Evaluate {
        /// Root of the results tree
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,

        /// Output file; .csv, .json or .xlsx
        #[arg(short, long, default_value = "output/evaluation_results.csv")]
        output: PathBuf,

        /// Append a timestamp to the output file name
        #[arg(long)]
        timestamp: bool,
    },
    /// List services and tools
    Catalog {
        /// Configuration file overriding the built-in catalog
        #[arg(short, long, env = "REST_BENCH_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Cli {
    /// Execute the selected command
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Run {
                tool,
                service,
                budget,
                config,
            } => {
                run_tool(
                    RunRequest {
                        service: *service,
                        tool: *tool,
                        budget: *budget,
                    },
                    config.as_deref(),
                )
                .await
            }
            Commands::Evaluate {
                results_dir,
                output,
                timestamp,
            } => evaluate(results_dir, output, *timestamp),
            Commands::Catalog { config } => catalog(config.as_deref()),
            Commands::Validate { config } => validate(config),
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    HarnessConfig::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from: {}", path.display()),
        None => "Invalid built-in configuration".to_string(),
    })
}

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

async fn run_tool(request: RunRequest, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let orchestrator = OrchestratorBuilder::new()
        .config(config)
        .container_dispatcher()
        .build()?;

    // Resolve everything before touching a service.
    let plan = orchestrator.plan(request)?;

    println!("\n{}", rule());
    println!("   rest-bench: {} against {}", plan.tool, plan.service);
    println!("{}", rule());
    println!();
    println!("Configuration:");
    println!("  Service:      {} ({:?})", plan.service, plan.kind);
    println!("  Base URL:     {}", plan.base_url);
    println!("  Tool:         {}", plan.tool);
    println!("  Budget:       {} ({:?})", plan.budget.budget, plan.budget.source);
    println!("  Results:      {}", plan.run_dir.display());
    println!("{}", rule());
    println!();

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(match plan.kind {
        ServiceKind::Local => format!("{} running, {} serving", plan.tool, plan.service),
        ServiceKind::Remote => format!("{} running", plan.tool),
    });
    pb.enable_steady_tick(Duration::from_millis(120));

    let result = orchestrator.run_with_signal_handling(request).await;
    pb.finish_and_clear();

    let report = result.with_context(|| format!("Run of {} against {} failed", request.tool, request.service))?;
    print_run_report(&report);
    Ok(())
}

fn print_run_report(report: &RunReport) {
    let outcome = &report.outcome;

    println!("{}", rule());
    println!("   Run Results");
    println!("{}", rule());
    println!();
    match outcome.exit_code {
        Some(code) => println!("  Exit code:    {code}"),
        None => println!("  Exit code:    none (killed)"),
    }
    println!("  Elapsed:      {:.1} s", outcome.elapsed.as_secs_f64());
    if outcome.timed_out {
        println!("  Timed out:    yes, results may be partial");
    }
    println!("  Tool log:     {}", outcome.log_file.display());

    match &report.coverage {
        Some(Ok(snapshot)) => {
            println!("  Coverage:     {}", snapshot.directory.display());
            if let Some(overall) = snapshot.report.overall() {
                println!("  Overall:      {overall:.2}%");
            }
        }
        Some(Err(e)) => println!("  Coverage:     failed ({e})"),
        None => {}
    }
    for error in &report.teardown_errors {
        println!("  Teardown:     {error}");
    }
    println!();
    println!("{}", rule());

    if !outcome.success() {
        tracing::warn!(
            tool = %report.plan.tool,
            exit_code = ?outcome.exit_code,
            "Tool exited unsuccessfully; run `rest-bench evaluate` to inspect partial results"
        );
    }
}

fn evaluate(results_dir: &Path, output: &Path, timestamp: bool) -> Result<()> {
    let report = aggregate(results_dir)
        .with_context(|| format!("Failed to aggregate results in: {}", results_dir.display()))?;

    let path = if timestamp {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        timestamped_path(output, &stamp)
    } else {
        output.to_path_buf()
    };

    write_report(&report, &path)?;
    println!("✓ Results written to: {}", path.display());
    println!();
    print!("{}", render_summary(&report));
    Ok(())
}

fn catalog(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;

    println!("Services:");
    for (id, spec) in &config.catalog.services {
        let port = spec
            .local
            .as_ref()
            .map(|local| format!("port {}", local.port))
            .unwrap_or_else(|| "remote".to_string());
        let budget = spec
            .reference_budget_secs
            .map(|secs| format!("{secs}s"))
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<16} {:<10} budget {:<8} {}", id.as_str(), port, budget, spec.base_url);
    }
    println!();
    println!("Tools:");
    for (id, spec) in &config.catalog.tools {
        let discipline = format!("{:?}", spec.discipline);
        println!("  {:<16} {:<18} {}", id.as_str(), discipline, spec.image);
    }
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    let local = config
        .catalog
        .services
        .values()
        .filter(|spec| spec.kind() == ServiceKind::Local)
        .count();
    println!(
        "✓ {} is valid: {} services ({} local), {} tools",
        path.display(),
        config.catalog.services.len(),
        local,
        config.catalog.tools.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_parses_identifiers() {
        let cli = Cli::try_parse_from([
            "rest-bench", "run", "--tool", "autoresttest", "--service", "genome-nexus", "--budget", "600",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                tool,
                service,
                budget,
                ..
            } => {
                assert_eq!(tool, ToolId::Autoresttest);
                assert_eq!(service, ServiceId::GenomeNexus);
                assert_eq!(budget, Some(600));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_identifier_rejected_at_parse() {
        let err = Cli::try_parse_from(["rest-bench", "run", "--tool", "schemathesis", "--service", "fdic"])
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_evaluate_defaults() {
        let cli = Cli::try_parse_from(["rest-bench", "-v", "evaluate"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Evaluate {
                results_dir,
                output,
                timestamp,
            } => {
                assert_eq!(results_dir, PathBuf::from("results"));
                assert_eq!(output, PathBuf::from("output/evaluation_results.csv"));
                assert!(!timestamp);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_evaluate_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let artifact = results.join("fdic/restifai/output/results.json");
        std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
        std::fs::write(&artifact, r#"{"successful_operations": 4, "total_tests": 8, "failed_tests": 2}"#).unwrap();
        let output = dir.path().join("out/eval.csv");

        evaluate(&results, &output, false).unwrap();

        let text = std::fs::read_to_string(output).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().starts_with("fdic,restifai,4,"));
    }

    #[test]
    fn test_evaluate_missing_results_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(evaluate(&dir.path().join("missing"), &dir.path().join("out.csv"), false).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rest-bench.toml");
        std::fs::write(&path, "container_runtime = \"\"\n").unwrap();
        assert!(validate(&path).is_err());
    }
}
