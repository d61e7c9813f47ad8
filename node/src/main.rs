use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tenspot_execution::{Ledger, Settlement};
use tenspot_node::{
    init_logging, load_config, postgres::PostgresLedger, scheduler::Scheduler, seed_settings,
    sqlite::SqliteLedger, Database, ValidatedConfig,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Settlement node for tenspot draws")]
struct Args {
    /// YAML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Validate the configuration and exit without opening the ledger.
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    if let Err(err) = main_result() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn main_result() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    if args.dry_run {
        println!("{:#?}", config.redacted_debug());
        config.validate().context("Invalid configuration")?;
        println!("config ok");
        return Ok(());
    }

    let redacted = format!("{:?}", config.redacted_debug());
    let config = config.validate().context("Invalid configuration")?;
    init_logging(config.log_level, config.log_json);
    info!(config = %redacted, "loaded config file");

    // The postgres client blocks on its own runtime: open ledgers before entering ours
    match config.database.clone() {
        Database::Sqlite(path) => {
            let ledger = SqliteLedger::open(&path, config.busy_timeout)
                .with_context(|| format!("Could not open sqlite ledger {}", path.display()))?;
            serve(Arc::new(ledger), &config)
        }
        Database::Postgres(url) => {
            let ledger = PostgresLedger::connect(&url, config.postgres_pool_size)
                .context("Could not connect to postgres ledger")?;
            serve(Arc::new(ledger), &config)
        }
    }
}

fn serve<L: Ledger + 'static>(ledger: Arc<L>, config: &ValidatedConfig) -> Result<()> {
    if seed_settings(ledger.as_ref(), &config.settings).context("Could not seed settings")? {
        info!(settings = ?config.settings, "seeded game settings");
    }

    let settlement = Settlement::new(ledger.clone(), config.rules.clone(), config.offset);
    let scheduler = Scheduler::new(
        Arc::new(settlement),
        config.offset,
        config.settle_delay,
        config.retry,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Could not start runtime")?;
    runtime.block_on(scheduler.run(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }));
    drop(runtime);

    // Last handle: the ledger closes outside the runtime.
    drop(ledger);
    info!("node stopped");
    Ok(())
}
