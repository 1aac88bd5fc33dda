//! minimart-indexer: ingest MiniMart marketplace events into a relational store.
//!
//! Usage:
//! ```bash
//! minimart-indexer run     --rpc-url https://sepolia.base.org --database-url postgres://localhost/minimart
//! minimart-indexer init-db --database-url sqlite:./minimart.db
//! minimart-indexer status  --database-url sqlite:./minimart.db
//! ```
//!
//! Every flag can also be set through the environment variable named in
//! `--help`. `run` exits 0 after SIGINT/SIGTERM and non-zero on any fatal
//! error; a supervisor is expected to restart it.

mod logging;
mod store;

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use minimart_indexer_core::cursor::CursorStore;
use minimart_indexer_core::indexer::{DEFAULT_CONTRACT_ADDRESS, DEFAULT_GENESIS_BLOCK};
use minimart_indexer_core::writer::BatchWriter;
use minimart_indexer_evm::{HttpClientConfig, HttpRpcClient, IndexerBuilder, PipelineReport};

use crate::logging::LogConfig;
use crate::store::Store;

#[derive(Debug, Parser)]
#[command(name = "minimart-indexer")]
#[command(about = "MiniMart chain event ingestion pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log filter, e.g. "info" or "info,minimart_indexer_evm=debug" (RUST_LOG overrides)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit JSON structured logs
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Backfill from the resume position, then follow the chain head
    Run(RunArgs),
    /// Create the events table and indexes, then exit
    InitDb(StoreArgs),
    /// Print the resume position and stored event count
    Status(StatusArgs),
}

#[derive(Debug, Args)]
struct StoreArgs {
    /// Store connection URL (`sqlite:./minimart.db` or `postgres://...`)
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Block scanned first when the store is empty
    #[arg(long, env = "START_BLOCK")]
    start_block: Option<u64>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// JSON-RPC endpoint of the chain node
    #[arg(long, env = "RPC_URL")]
    rpc_url: String,

    /// MiniMart contract address (defaults to the deployed marketplace)
    #[arg(long, env = "CONTRACT_ADDRESS")]
    contract_address: Option<Address>,

    /// Block scanned first when the store is empty (defaults to the deployment block)
    #[arg(long, env = "START_BLOCK")]
    start_block: Option<u64>,

    /// Maximum blocks per eth_getLogs request
    #[arg(long, env = "MAX_WINDOW_SPAN", default_value = "480")]
    max_window_span: u64,

    /// Maximum records per write
    #[arg(long, env = "WRITE_BATCH_SIZE", default_value = "100")]
    write_batch_size: usize,

    #[arg(long, env = "WRITE_INTERVAL_MS", default_value = "250")]
    write_interval_ms: u64,

    #[arg(long, env = "DEAD_LETTER_INTERVAL_MS", default_value = "30000")]
    dead_letter_interval_ms: u64,

    /// Total attempts per batch before it is dead-lettered
    #[arg(long, env = "WRITE_ATTEMPTS", default_value = "3")]
    write_attempts: u32,

    #[arg(long, env = "WRITE_BACKOFF_MS", default_value = "125")]
    write_backoff_ms: u64,

    /// Head polling interval for the live phase and for a caught-up scanner
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "2000")]
    poll_interval_ms: u64,

    /// Per-request RPC timeout
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value = "30")]
    rpc_timeout_secs: u64,
}

impl RunArgs {
    fn builder(&self) -> IndexerBuilder {
        IndexerBuilder::new()
            .contract_address(self.contract_address.unwrap_or(DEFAULT_CONTRACT_ADDRESS))
            .genesis_block(self.start_block.unwrap_or(DEFAULT_GENESIS_BLOCK))
            .max_window_span(self.max_window_span)
            .write_batch_size(self.write_batch_size)
            .write_interval_ms(self.write_interval_ms)
            .dead_letter_interval_ms(self.dead_letter_interval_ms)
            .write_retry(self.write_attempts, self.write_backoff_ms)
            .live_poll_interval_ms(self.poll_interval_ms)
            .idle_poll_interval_ms(self.poll_interval_ms)
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
    });

    match dispatch(cli.command).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "minimart-indexer failed");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Run(args) => cmd_run(args).await,
        Command::InitDb(args) => cmd_init_db(args).await,
        Command::Status(args) => cmd_status(args).await,
    }
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let client = HttpRpcClient::new(
        args.rpc_url.clone(),
        HttpClientConfig {
            request_timeout: Duration::from_secs(args.rpc_timeout_secs),
        },
    )
    .context("building RPC client")?;
    let store = Store::connect(&args.store.database_url).await?;
    tracing::info!(rpc = client.url(), store = store.backend(), "starting indexer");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let builder = args.builder();
    let report = match store {
        Store::Sqlite(s) => run_pipeline(builder, client, s, shutdown).await?,
        Store::Postgres(s) => run_pipeline(builder, client, s, shutdown).await?,
    };

    tracing::info!(
        resumed_from = report.resume.block_number,
        records_written = report.stats.records_written,
        unwritten = report.intake_depth + report.dead_letter_depth,
        "indexer exited cleanly"
    );
    Ok(())
}

async fn run_pipeline<S>(
    builder: IndexerBuilder,
    client: HttpRpcClient,
    store: Arc<S>,
    shutdown: CancellationToken,
) -> Result<PipelineReport>
where
    S: BatchWriter + CursorStore + 'static,
{
    let pipeline = builder.build(client, store).context("invalid configuration")?;
    let report = pipeline.run(shutdown).await.context("pipeline failed")?;
    Ok(report)
}

async fn cmd_init_db(args: StoreArgs) -> Result<()> {
    let store = Store::connect(&args.database_url).await?;
    println!("{} schema ready", store.backend());
    Ok(())
}

async fn cmd_status(args: StatusArgs) -> Result<()> {
    let store = Store::connect(&args.store.database_url).await?;
    let events = store.event_count().await.context("counting events")?;
    let max = store.max_committed_block().await.context("reading resume position")?;

    println!("minimart-indexer {}", env!("CARGO_PKG_VERSION"));
    println!("  Store:            {}", store.backend());
    println!("  Stored events:    {events}");
    match max {
        Some(block) => println!("  Resume position:  {block} (highest committed block)"),
        None => println!(
            "  Resume position:  {} (genesis, store is empty)",
            args.start_block.unwrap_or(DEFAULT_GENESIS_BLOCK)
        ),
    }
    Ok(())
}

/// Cancel `token` on the first SIGINT or SIGTERM.
async fn shutdown_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown signal received, stopping gracefully");
    token.cancel();
}
