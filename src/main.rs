//! txpilot - resilient transaction submission for automated swaps
//!
//! Submits router swaps and daily check-ins against an EVM endpoint, retrying
//! through dropped connections and underpriced rejections, and waits for each
//! transaction to be included.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::H256;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

mod bot;
mod chain;
mod config;
mod error;
mod metrics;
mod ops;
mod shutdown;
mod tx;

use bot::Bot;
use chain::ConnectionManager;
use config::Settings;
use metrics::MetricsServer;
use shutdown::{abort_pair, AbortHandle};
use tx::LocalSigner;

#[derive(Parser)]
#[command(name = "txpilot", version)]
#[command(about = "Resilient transaction submission and confirmation", long_about = None)]
struct Cli {
    /// Config file (overrides TXPILOT_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check in, then run swap cycles until interrupted
    Run,
    /// Submit a single check-in
    Checkin,
    /// Approve the router to spend an amount of the token
    Approve {
        /// Amount in token units
        amount: f64,
    },
    /// Wait for an already-broadcast transaction
    Wait {
        tx_hash: H256,
    },
    /// Print native and token balances
    Balances,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging();

    info!("Starting txpilot v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    info!(
        "Loaded configuration for {} (chain {})",
        settings.endpoint.rpc_url, settings.endpoint.chain_id
    );

    let (abort_handle, abort) = abort_pair();
    tokio::spawn(abort_on_signal(abort_handle));

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let signer = LocalSigner::from_env(&settings.wallet.private_key_env, settings.endpoint.chain_id)
        .context("Failed to load wallet")?;
    info!("Wallet: {:?}", signer);

    let manager = Arc::new(ConnectionManager::http(settings.endpoint.clone()));
    let mut conn = manager.connect().await?;

    let mut bot = Bot::new(&settings, manager.clone(), Arc::new(signer), abort)?;

    let outcome = match cli.command {
        Commands::Run => bot.run(&mut conn).await,
        Commands::Checkin => bot.check_in(&mut conn).await.map(|receipt| {
            info!("Checked in: {:?} (block {})", receipt.tx_hash, receipt.block_number);
        }),
        Commands::Approve { amount } => bot.approve(&mut conn, amount).await.map(|receipt| {
            info!("Approved: {:?} (block {})", receipt.tx_hash, receipt.block_number);
        }),
        Commands::Wait { tx_hash } => bot.wait_for(&mut conn, tx_hash).await.map(|receipt| {
            info!(
                "{:?} included in block {} (status {}, gas used {})",
                receipt.tx_hash,
                receipt.block_number,
                if receipt.success { "ok" } else { "reverted" },
                receipt.gas_used
            );
        }),
        Commands::Balances => bot.balances(&mut conn).await.map(|b| {
            info!("Balances: {:.4} native, {:.4} token", b.native, b.token);
        }),
    };

    if let Some(h) = metrics_handle {
        h.abort();
    }

    match outcome {
        Ok(()) | Err(error::PilotError::Aborted) => {
            info!("txpilot stopped");
            Ok(())
        }
        Err(e) => {
            if e.should_alert() {
                error!("ALERT: {}", e);
            }
            Err(e.into())
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,txpilot=debug,hyper=warn"));

    let json = std::env::var("TXPILOT_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Trip the abort signal on Ctrl-C or SIGTERM
async fn abort_on_signal(handle: AbortHandle) {
    shutdown_signal().await;
    info!("Shutdown signal received, stopping after the current step...");
    handle.abort();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
