use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod db;
mod error;
mod models;
mod price;
mod sync;
mod utils;
mod workers;

#[cfg(test)]
mod testing;

use config::Settings;
use db::{migrations, schema::CURRENT_REVISION, Database};
use error::StartupError;
use price::{CoinGecko, PriceFeed};
use sync::{startup_mode, NodeClient, StartupMode, Watcher};
use workers::{cex::catalogue, repair};

#[derive(Parser, Debug)]
#[command(name = "ergo-watch")]
#[command(version, about = "Ergo blockchain indexer for balances, block stats and supply metrics")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", env = "EW_CONFIG")]
    config: Option<PathBuf>,

    /// Allow schema migrations
    #[arg(short = 'm', long)]
    allow_migrations: bool,

    /// Resume an interrupted repair session instead of discarding it
    #[arg(short = 'r', long)]
    resume_repair: bool,

    /// Process pending blocks and exit
    #[arg(long)]
    exit: bool,

    /// Run the bootstrap phase on an unconstrained database
    #[arg(long)]
    bootstrap: bool,

    /// Skip the bootstrap phase (empty database only)
    #[arg(long)]
    no_bootstrap: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "ergo_watch=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.bootstrap && cli.no_bootstrap {
        return Err(StartupError::ConflictingBootstrapFlags.into());
    }
    let settings = Settings::load(cli.config.as_deref())?;

    info!("Starting ergo-watch v{}", env!("CARGO_PKG_VERSION"));
    info!("Node: {}", settings.node.url);
    info!("Database: {}", settings.database.path);

    // Ensure data directory exists
    if let Some(parent) = Path::new(&settings.database.path).parent() {
        std::fs::create_dir_all(parent).context("Failed to create data directory")?;
    }

    let db = Database::open(&settings.database)?;
    let applied = migrations::run(&db, cli.allow_migrations)?;
    if !applied.is_empty() {
        info!("Database is at revision {}", CURRENT_REVISION);
    }
    db.execute_transaction(|conn| catalogue::seed(conn, &settings.cexs))?;
    let mode = startup_mode(&db, cli.bootstrap, cli.no_bootstrap)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, finishing current block");
            let _ = shutdown_tx.send(true);
        }
    });

    let price_task = if settings.price.enabled {
        let feed = PriceFeed::new(CoinGecko::new(&settings.price)?, db.clone(), settings.price.clone());
        Some(price::spawn(feed, shutdown_rx.clone()))
    } else {
        None
    };

    let node = NodeClient::new(&settings.node)?;
    let mut watcher = Watcher::new(node, db.clone(), &settings, cli.exit, shutdown_rx);
    repair::on_startup(&db, cli.resume_repair)?;

    let result = async {
        if mode == StartupMode::Bootstrap {
            watcher.bootstrap().await?;
        }
        // An interrupted bootstrap leaves the database unconstrained
        if migrations::constraints_set(&db)? {
            watcher.run().await?;
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    if let Some(task) = price_task {
        task.abort();
    }
    if let Err(e) = db.checkpoint() {
        warn!("Final checkpoint failed: {}", e);
    }
    result
}
