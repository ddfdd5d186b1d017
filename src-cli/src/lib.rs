//! Registra command-line shell.
//!
//! This is the thin binary that parses arguments, loads configuration and
//! prints JSON. Query logic lives in the `crates/` directory.

pub mod commands;
pub mod error;
pub mod state;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::batch::{run_batch, BatchArgs};
use commands::check::run_check;
use commands::portals::{list_portals, CategoryArg};
use commands::query::{run_query, QueryArgs};
use error::CommandError;
use registra_engine::QueryStatus;
use serde::Serialize;
use state::AppState;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Query CAPTCHA-gated public record portals.
#[derive(Debug, Parser)]
#[command(name = "registra", version, about)]
pub struct Cli {
    /// Config file; defaults to the platform config directory
    #[arg(long, global = true, env = "REGISTRA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Query one portal and print the result as JSON
    Query(QueryArgs),
    /// Run several queries from a JSON file
    Batch(BatchArgs),
    /// List configured portals
    Portals {
        /// Only portals returning this record category
        #[arg(long, value_enum)]
        category: Option<CategoryArg>,
    },
    /// Check portal definitions and solver credentials
    Check,
}

/// Initialize tracing subscriber for logging. Logs go to stderr so stdout
/// carries only JSON.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,registra=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Command output and whether it counts as success for the exit code.
struct Output {
    value: serde_json::Value,
    success: bool,
}

impl Output {
    fn new(value: &impl Serialize, success: bool) -> Result<Self, CommandError> {
        Ok(Self {
            value: serde_json::to_value(value)
                .map_err(|e| CommandError::new("INTERNAL_ERROR", e.to_string()))?,
            success,
        })
    }
}

async fn execute(cli: Cli) -> Result<Output, CommandError> {
    let mut state = AppState::load(cli.config.as_deref())?;

    match cli.command {
        Command::Query(args) => {
            let result = run_query(&mut state, &args).await?;
            Output::new(&result, result.status != QueryStatus::Failed)
        }
        Command::Batch(args) => {
            let results = run_batch(&state, &args).await?;
            let success = results.iter().all(|r| r.status != QueryStatus::Failed);
            Output::new(&results, success)
        }
        Command::Portals { category } => {
            Output::new(&list_portals(&state, category.map(Into::into)), true)
        }
        Command::Check => {
            let report = run_check(&state).await;
            Output::new(&report, report.ok)
        }
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("writing JSON output")?;
    writeln!(stdout).context("writing JSON output")?;
    Ok(())
}

/// Entry point used by the `registra` binary.
///
/// Exit codes: 0 on success or empty results, 1 when a query failed or the
/// check did not pass, 2 on setup errors.
pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    info!("Starting Registra v{}", env!("CARGO_PKG_VERSION"));

    let (printed, code) = match execute(cli).await {
        Ok(output) => {
            let code = if output.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            };
            (print_json(&output.value), code)
        }
        Err(err) => {
            error!(code = %err.code, "{}", err.message);
            (print_json(&err), ExitCode::from(2))
        }
    };

    if let Err(e) = printed {
        error!("{e:#}");
        return ExitCode::from(2);
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use registra_core::SearchMode;

    #[test]
    fn test_parse_query() {
        let cli = Cli::try_parse_from([
            "registra", "query", "--target", "sat-lima-papeletas", "--value", "ABC-123",
        ])
        .expect("parse");

        let Command::Query(args) = cli.command else {
            panic!("expected query command");
        };
        assert_eq!(args.target, "sat-lima-papeletas");
        assert_eq!(args.mode, SearchMode::Plate);
        assert_eq!(args.value, "ABC-123");
        assert_eq!(args.max_attempts, None);
    }

    #[test]
    fn test_parse_mode_and_category() {
        let cli = Cli::try_parse_from([
            "registra", "query", "--target", "x-portal", "--mode", "ticket-number", "--value", "1",
        ])
        .expect("parse");
        let Command::Query(args) = cli.command else {
            panic!("expected query command");
        };
        assert_eq!(args.mode, SearchMode::TicketNumber);

        let cli = Cli::try_parse_from(["registra", "portals", "--category", "insurance-certificate"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Portals {
                category: Some(CategoryArg::InsuranceCertificate)
            }
        ));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(Cli::try_parse_from([
            "registra", "query", "--target", "x-portal", "--mode", "vin", "--value", "1",
        ])
        .is_err());
    }
}
