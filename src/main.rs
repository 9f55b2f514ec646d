//! rest-bench CLI
//!
//! Runs REST API testing tools against target services and aggregates what
//! they leave behind.

use std::process::ExitCode;

use clap::Parser;
use rest_bench_core::BenchError;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Cli;

/// Conventional exit status after SIGINT
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments; clap exits with status 2 on usage errors
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let interrupted = e
                .chain()
                .any(|cause| matches!(cause.downcast_ref::<BenchError>(), Some(BenchError::Interrupted)));
            if interrupted {
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
