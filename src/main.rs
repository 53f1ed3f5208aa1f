//! weekly loan billing menu
//!
//! Environment variables (a `.env` file is honoured):
//!
//! * `BILLING_LEDGER_PATH` - json ledger file (default: transactions.json)
//! * `BILLING_LOG_LEVEL` - tracing filter (default: info), `RUST_LOG` wins when set
//! * `BILLING_MAX_ID_ATTEMPTS` - attempts at drawing an unused loan id (default: 5)
//!
//! Command-line flags override the environment.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loan_billing_rs::{menu, BillingConfig, BillingEngine, JsonLoanRepository};

#[derive(Parser, Debug)]
#[command(name = "loan-billing", version, about = "Weekly flat-interest loan billing")]
struct Args {
    /// json ledger file holding every loan
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// tracing filter, e.g. debug or loan_billing_rs=trace
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = load_config(args)?;

    init_tracing(&config.log_level);

    tracing::info!(
        ledger = %config.ledger_path.display(),
        "starting loan billing"
    );

    let repository = JsonLoanRepository::new(&config.ledger_path);
    let engine = BillingEngine::new(repository).with_max_id_attempts(config.max_id_attempts);

    let stdin = io::stdin();
    menu::run_menu(&engine, stdin.lock(), io::stdout().lock())
}

fn load_config(args: Args) -> Result<BillingConfig> {
    let mut config = BillingConfig::from_env().context("failed to read BILLING_* environment")?;

    if let Some(ledger) = args.ledger {
        config = config.with_ledger_path(ledger);
    }
    if let Some(level) = args.log_level {
        config = config.with_log_level(level);
    }

    config.validate()?;
    Ok(config)
}

/// log to stderr so the menu keeps stdout to itself
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(io::stderr),
        )
        .init();
}
