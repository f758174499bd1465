//! Pot Ledger - Operator Entry Point
//!
//! Command line tooling for inspecting pots, recording deposits, moving
//! funds between pots, withdrawing, and running the reconciliation check.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pot_ledger::config::load_config;
use pot_ledger::{
    Ledger, LedgerConfig, LedgerStore, MemoryStore, PostgresStore, RetryPolicy,
    WithdrawalRequest,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ledger.toml", env = "LEDGER_CONFIG")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List pots with percentage and balance
    Pots,
    /// Split a deposit across all pots
    Allocate {
        amount: Decimal,
        /// Originating wager identifier
        source_ref: String,
    },
    /// Move funds from one pot to another
    Transfer {
        from: String,
        to: String,
        amount: Decimal,
        /// Operator on whose behalf the transfer runs
        actor: String,
    },
    /// Remove funds from a pot
    Withdraw {
        pot: String,
        amount: Decimal,
        /// Operator on whose behalf the withdrawal runs
        actor: String,
        /// Replays with the same key return the original withdrawal
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Replace every pot's percentage, e.g. Premios=70 Reserva=20 Ganancias=10
    SetPercentages {
        #[arg(required = true, value_parser = parse_percentage)]
        pairs: Vec<(String, Decimal)>,
    },
    /// Replay the audit log and compare it with live balances
    Reconcile,
    /// Print audit entries as JSON lines
    History {
        /// Only entries after this sequence number
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
}

fn parse_percentage(raw: &str) -> std::result::Result<(String, Decimal), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PERCENT, got {}", raw))?;
    let percentage = value
        .trim()
        .parse::<Decimal>()
        .map_err(|e| format!("invalid percentage {}: {}", value, e))?;
    Ok((name.trim().to_string(), percentage))
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(
            builder.with_file(true).with_line_number(true).finish(),
        )?;
    }
    Ok(())
}

async fn open_store(config: &LedgerConfig) -> Result<Arc<dyn LedgerStore>> {
    match &config.database {
        Some(database) => {
            let store = PostgresStore::connect(database)
                .await
                .context("failed to connect to the ledger database")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database configured, using in-memory store (changes are not persisted)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load environment variables and configuration
    let config = load_config(Some(&args.config))?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.settings.log_level.clone());
    init_logging(&level, config.settings.json_logs)?;

    info!("Starting pot ledger");
    info!("Configuration file: {}", args.config);

    let store = open_store(&config).await?;
    let ledger = Ledger::open(store, &config.pots, &config.settings).await?;
    let retry = RetryPolicy::from_settings(&config.settings.retry);

    match args.command {
        Command::Pots => {
            for pot in ledger.list_pots().await {
                println!("{:<16} {:>8}% {:>14}", pot.name, pot.percentage, pot.balance);
            }
            let totals = ledger.totals().await;
            println!(
                "deposited {} / withdrawn {} / held {}",
                totals.deposited, totals.withdrawn, totals.held
            );
        }
        Command::Allocate { amount, source_ref } => {
            let result = retry
                .retry(|_| ledger.allocate(amount, &source_ref))
                .await?;
            for credit in &result.credits {
                println!("{:<16} +{:>12} -> {:>14}", credit.pot, credit.credited, credit.balance);
            }
        }
        Command::Transfer {
            from,
            to,
            amount,
            actor,
        } => {
            let result = retry
                .retry(|_| ledger.transfer(&from, &to, amount, &actor))
                .await?;
            println!("{}: {}", from, result.from_balance);
            println!("{}: {}", to, result.to_balance);
        }
        Command::Withdraw {
            pot,
            amount,
            actor,
            idempotency_key,
        } => {
            let mut request = WithdrawalRequest::new(pot.clone(), amount, actor);
            if let Some(key) = idempotency_key {
                request = request.with_idempotency_key(key);
            }
            let result = retry
                .retry(|_| ledger.submit_withdrawal(request.clone()))
                .await?;
            println!(
                "{} {} remaining in {}{}",
                result.withdrawal_id,
                result.remaining_balance,
                pot,
                if result.replayed { " (replayed)" } else { "" }
            );
        }
        Command::SetPercentages { pairs } => {
            let mapping: HashMap<String, Decimal> = pairs.into_iter().collect();
            let pots = retry.retry(|_| ledger.set_percentages(&mapping)).await?;
            for pot in pots {
                println!("{:<16} {:>8}%", pot.name, pot.percentage);
            }
        }
        Command::Reconcile => {
            let report = ledger.reconcile().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            report.ensure_consistent()?;
        }
        Command::History { since } => {
            for entry in ledger.entries_since(since).await {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_percentage() {
        assert_eq!(
            parse_percentage("Premios=70").unwrap(),
            ("Premios".to_string(), dec!(70))
        );
        assert_eq!(
            parse_percentage(" Reserva = 12.5 ").unwrap(),
            ("Reserva".to_string(), dec!(12.5))
        );
        assert!(parse_percentage("Premios").is_err());
        assert!(parse_percentage("Premios=abc").is_err());
    }

    #[test]
    fn test_cli_parses_withdraw() {
        let args = Args::parse_from([
            "pot-ledger",
            "withdraw",
            "Ganancias",
            "15.50",
            "op-2",
            "--idempotency-key",
            "req-1",
        ]);
        match args.command {
            Command::Withdraw {
                pot,
                amount,
                idempotency_key,
                ..
            } => {
                assert_eq!(pot, "Ganancias");
                assert_eq!(amount, dec!(15.50));
                assert_eq!(idempotency_key.as_deref(), Some("req-1"));
            }
            other => panic!("Expected Withdraw, got {:?}", other),
        }
    }
}
