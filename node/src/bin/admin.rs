//! Operator tooling for a tenspot ledger.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tenspot_execution::{Ledger, LedgerTx, Settlement, SettlementOutcome, SystemEntropy};
use tenspot_node::{
    init_logging, load_config, operator, postgres::PostgresLedger, seed_settings,
    sqlite::SqliteLedger, Database, ValidatedConfig,
};
use tenspot_types::{Amount, GameSettings, Role};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Operator tooling for a tenspot ledger")]
struct Args {
    /// YAML configuration file (same file the node runs with).
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the schema and seed game settings from the configuration.
    Init,
    #[command(subcommand)]
    Account(AccountCommand),
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Print the most recent results.
    Results {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Sales, payout and RTP of one local day (today by default).
    Stats {
        /// Local date, e.g. 2026-03-01.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Settled rounds with their collection and payout, newest first.
    History {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Settle every due round now, or one round by its end time (RFC 3339).
    Settle {
        #[arg(long)]
        end_time: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    Create {
        name: String,
        #[arg(long, default_value = "retailer")]
        role: Role,
        /// Opening balance, e.g. 250 or 250.50.
        #[arg(long, default_value = "0")]
        balance: Amount,
    },
    /// Credit an account.
    TopUp { name: String, amount: Amount },
    /// Stop an account from submitting tickets.
    Block { name: String },
    Unblock { name: String },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    Show,
    /// Overwrite stored settings; omitted values keep their stored value.
    Set {
        #[arg(long)]
        target_rtp: Option<u32>,
        #[arg(long)]
        min_round_rtp: Option<u32>,
        #[arg(long)]
        max_round_rtp: Option<u32>,
        #[arg(long)]
        round_minutes: Option<u32>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?
        .validate()
        .context("Invalid configuration")?;
    init_logging(config.log_level, config.log_json);

    match config.database.clone() {
        Database::Sqlite(path) => {
            let ledger = SqliteLedger::open(&path, config.busy_timeout)
                .with_context(|| format!("Could not open sqlite ledger {}", path.display()))?;
            run(&ledger, &config, args.command)
        }
        Database::Postgres(url) => {
            let ledger = PostgresLedger::connect(&url, 1)
                .context("Could not connect to postgres ledger")?;
            run(&ledger, &config, args.command)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run<L: Ledger>(ledger: &L, config: &ValidatedConfig, command: Command) -> Result<()> {
    match command {
        Command::Init => {
            if seed_settings(ledger, &config.settings)? {
                info!(settings = ?config.settings, "seeded game settings");
            } else {
                warn!("settings already present, left unchanged");
            }
            Ok(())
        }
        Command::Account(AccountCommand::Create {
            name,
            role,
            balance,
        }) => print_json(&operator::create_account(ledger, &name, role, balance)?),
        Command::Account(AccountCommand::TopUp { name, amount }) => {
            print_json(&operator::top_up(ledger, &name, amount)?)
        }
        Command::Account(AccountCommand::Block { name }) => {
            print_json(&operator::set_active(ledger, &name, false)?)
        }
        Command::Account(AccountCommand::Unblock { name }) => {
            print_json(&operator::set_active(ledger, &name, true)?)
        }
        Command::Settings(SettingsCommand::Show) => print_json(&ledger.begin()?.settings()?),
        Command::Settings(SettingsCommand::Set {
            target_rtp,
            min_round_rtp,
            max_round_rtp,
            round_minutes,
        }) => {
            let mut tx = ledger.begin()?;
            let stored = tx.settings()?;
            let updated = GameSettings {
                target_rtp: target_rtp.unwrap_or(stored.target_rtp),
                min_round_rtp: min_round_rtp.unwrap_or(stored.min_round_rtp),
                max_round_rtp: max_round_rtp.unwrap_or(stored.max_round_rtp),
                round_minutes: round_minutes.unwrap_or(stored.round_minutes),
            };
            updated.validate()?;
            tx.put_settings(&updated)?;
            tx.commit()?;
            info!(?stored, ?updated, "settings updated");
            print_json(&updated)
        }
        Command::Results { limit } => {
            let limit = limit.unwrap_or(config.public_results);
            let results = ledger.begin()?.recent_results(limit)?;
            let board: Vec<_> = results
                .iter()
                .map(|result| {
                    serde_json::json!({
                        "round_id": result.round_id,
                        "spot": config.rules.labels.label(result.spot),
                        "end_time": result.end_time.with_timezone(&config.offset).to_rfc3339(),
                    })
                })
                .collect();
            print_json(&board)
        }
        Command::Stats { date } => {
            let date = date.unwrap_or_else(|| operator::local_date(Utc::now(), config.offset));
            print_json(&operator::day_report(ledger, config.offset, date)?)
        }
        Command::History { limit } => {
            let rounds = operator::history(ledger, limit)?;
            let board: Vec<_> = rounds
                .iter()
                .map(|round| {
                    serde_json::json!({
                        "round_id": round.id,
                        "end_time": round.end_time.with_timezone(&config.offset).to_rfc3339(),
                        "spot": round.winning_spot.map(|spot| config.rules.labels.label(spot)),
                        "collection": round.collection,
                        "payout": round.payout,
                    })
                })
                .collect();
            print_json(&board)
        }
        Command::Settle { end_time } => {
            let settlement = Settlement::new(ledger, config.rules.clone(), config.offset);
            let now = Utc::now();
            let outcomes = match end_time {
                Some(end_time) => vec![settlement.settle_round(end_time, now, &mut SystemEntropy)?],
                None => {
                    let sweep = settlement.settle_due(now, &mut SystemEntropy)?;
                    for (end_time, err) in &sweep.failed {
                        warn!(%end_time, ?err, "round left pending");
                    }
                    sweep.outcomes
                }
            };
            for outcome in outcomes {
                match outcome {
                    SettlementOutcome::Settled(report) => println!(
                        "round {} ({}) -> {} collection {} payout {} [{}]",
                        report.round_id,
                        report.end_time.with_timezone(&config.offset),
                        config.rules.labels.label(report.spot),
                        report.collection,
                        report.payout,
                        report.mode.as_str(),
                    ),
                    SettlementOutcome::AlreadyProcessed(round) => {
                        println!("round {round} already processed")
                    }
                }
            }
            Ok(())
        }
    }
}
