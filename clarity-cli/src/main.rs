//! Clarity CLI: collect, ingest, and query EOD candle data.
//!
//! Commands:
//! - `collect` runs the periodic collector (or a single tick with `--once`)
//! - `ingest` loads every collected candle file into the store
//! - `tables` lists store tables
//! - `fractals` computes Williams Fractals over a table
//! - `candles` fetches one instrument's candles and prints them

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clarity_core::data::{CandleFiles, DataClient, EodClient, Format, Ingestor};
use clarity_core::domain::{Granularity, Instrument};
use clarity_core::indicators::{williams_fractal, FractalQuery};
use clarity_core::Store;
use clarity_runner::{
    init_logging, AppConfig, Collector, ExecutionStrategy, Job, Scheduler, StopOutcome,
    TickSummary,
};

/// How long `collect` waits for an in-flight tick after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "clarity", about = "Clarity: periodic EOD candle collection and analysis")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "clarity.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch candles for every configured instrument and granularity on an interval.
    Collect {
        /// Run a single tick and exit.
        #[arg(long, default_value_t = false)]
        once: bool,

        /// Run the loop on a dedicated worker thread.
        #[arg(long, default_value_t = false)]
        worker: bool,
    },
    /// Load collected candle files into store tables (existing tables are kept).
    Ingest,
    /// List store tables.
    Tables,
    /// Compute Williams Fractals over a store table.
    Fractals {
        /// Table name, e.g. USDJPY_d.
        #[arg(long)]
        table: String,

        /// Window half-width.
        #[arg(long, default_value_t = 2)]
        period: usize,

        #[arg(long, default_value = "close")]
        value_column: String,

        #[arg(long, default_value = "date")]
        order_column: String,

        /// Print at most this many rows (all rows when omitted).
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Fetch one instrument's candles and print them as JSON.
    Candles {
        ticker: String,
        exchange: String,
        granularity: String,

        /// Response format requested from the provider: json or csv.
        #[arg(long, default_value = "json")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Collect { once, worker } => run_collect(&cli.config, once, worker).await,
        Commands::Ingest => run_ingest(&cli.config),
        Commands::Tables => run_tables(&cli.config),
        Commands::Fractals {
            table,
            period,
            value_column,
            order_column,
            limit,
        } => {
            let query = FractalQuery::new(table)
                .with_period(period)
                .with_value_column(value_column)
                .with_order_column(order_column);
            run_fractals(&cli.config, &query, limit)
        }
        Commands::Candles {
            ticker,
            exchange,
            granularity,
            format,
        } => run_candles(&cli.config, &ticker, &exchange, &granularity, &format).await,
    }
}

/// Full config: file, environment, validation.
fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

/// Config for commands that only touch local files; provider settings are not
/// required.
fn load_local_config(path: &Path) -> Result<AppConfig> {
    AppConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn eod_client(config: &AppConfig) -> Result<EodClient> {
    let breaker = Arc::new(config.circuit_breaker());
    Ok(EodClient::new(config.eod_client_config(), breaker)?)
}

async fn run_collect(config_path: &Path, once: bool, worker: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let _log_guard = init_logging(&config.logging)?;
    tracing::debug!(?config, "configuration loaded");

    let tasks = config.tasks()?;
    let collector = Arc::new(Collector::new(
        Arc::new(eod_client(&config)?),
        tasks,
        CandleFiles::new(&config.collector.data_dir),
        config.collector.format,
        config.collector.max_concurrent_requests,
    ));

    if once {
        let summary = collector.collect_once().await?;
        summary.log_summary();
        for (task, err) in &summary.errors {
            eprintln!("Error for {task}: {err}");
        }
        return check_tick(&summary);
    }

    let strategy = if worker {
        ExecutionStrategy::DedicatedWorker
    } else {
        ExecutionStrategy::Cooperative
    };
    let scheduler = Scheduler::new(
        collector.name(),
        config.interval(),
        strategy,
        collector.clone(),
    );
    scheduler.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("shutdown requested");

    if scheduler.stop(SHUTDOWN_TIMEOUT).await == StopOutcome::TimedOut {
        eprintln!("Collection tick still running after {SHUTDOWN_TIMEOUT:?}; exiting anyway");
    }
    Ok(())
}

/// Fails a `--once` run when any task failed.
fn check_tick(summary: &TickSummary) -> Result<()> {
    if summary.failed > 0 {
        bail!("{} of {} tasks failed", summary.failed, summary.total);
    }
    Ok(())
}

fn run_ingest(config_path: &Path) -> Result<()> {
    let config = load_local_config(config_path)?;
    let _log_guard = init_logging(&config.logging)?;

    let tasks = config.tasks()?;
    if tasks.is_empty() {
        bail!("no instruments configured in {}", config_path.display());
    }

    let store = Store::open(&config.store.root)?;
    let ingestor = Ingestor::new(CandleFiles::new(&config.collector.data_dir));
    let tables = ingestor.ingest_all(&store, &tasks)?;

    println!("Tables in {}:", store.root().display());
    for table in tables {
        println!("  {table}");
    }
    Ok(())
}

fn run_tables(config_path: &Path) -> Result<()> {
    let config = load_local_config(config_path)?;
    let store = Store::open(&config.store.root)?;

    let tables = store.tables()?;
    if tables.is_empty() {
        println!("No tables in {}", store.root().display());
        return Ok(());
    }

    println!("{:<24} {:>8}  {}", "TABLE", "ROWS", "CREATED");
    for table in tables {
        match store.meta(&table)? {
            Some(meta) => println!("{:<24} {:>8}  {}", table, meta.row_count, meta.created_at),
            None => println!("{:<24} {:>8}  -", table, "-"),
        }
    }
    Ok(())
}

fn run_fractals(config_path: &Path, query: &FractalQuery, limit: Option<usize>) -> Result<()> {
    let config = load_local_config(config_path)?;
    let store = Store::open(&config.store.root)?;

    let df = williams_fractal(&store, query)?;
    let shown = match limit {
        Some(n) => df.head(Some(n)),
        None => df,
    };
    println!("{shown}");
    Ok(())
}

async fn run_candles(
    config_path: &Path,
    ticker: &str,
    exchange: &str,
    granularity: &str,
    format: &str,
) -> Result<()> {
    let config = load_config(config_path)?;
    let _log_guard = init_logging(&config.logging)?;

    let instrument = Instrument::new(ticker, exchange)?;
    let granularity: Granularity = granularity.parse()?;
    let format: Format = format.parse()?;

    let client = eod_client(&config)?;
    let payload = client.fetch(&instrument, &granularity, format).await?;
    if payload.is_empty() {
        println!("[]");
        return Ok(());
    }

    let records = payload.into_records(format)?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
