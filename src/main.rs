//! BetCycle automation daemon
//!
//! Health check, startup recovery, then the settlement/creation scheduler
//! alongside the notification feed HTTP server.
//!
//! Usage:
//!   betcycle [--run-now] [--config automation.toml]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use betcycle_backend::{
    api::{create_router, AppState},
    chain_data::HttpChainReader,
    init_tracing,
    ledger::ContractLedger,
    load_env,
    notifications::NotificationStore,
    scheduler::RecoveryPlan,
    spawn_scheduler, AutomationConfig, AutomationService,
};

#[derive(Parser, Debug)]
#[command(name = "betcycle")]
#[command(about = "Automated bet settlement and creation service")]
struct Args {
    /// Skip startup recovery and run the first cycle immediately
    #[arg(long, env = "RUN_NOW")]
    run_now: bool,

    /// TOML configuration file; environment variables still override it
    #[arg(short, long, env = "BETCYCLE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();
    let args = Args::parse();

    info!("🚀 Starting BetCycle automation service");

    let config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            AutomationConfig::from_toml_file(path)?
        }
        None => AutomationConfig::from_env()?,
    };
    info!(
        network = config.network.as_str(),
        rpc = %config.rpc_url,
        explorer = %config.explorer_api_url,
        "⚙️ Configuration loaded"
    );

    let ledger = ContractLedger::connect(&config)
        .await
        .context("failed to connect to betting contract")?;
    info!(
        "🔑 Signing as {:?} for contract {:?}",
        ledger.signer_address(),
        ledger.contract_address()
    );
    let chain = HttpChainReader::from_config(&config)?;
    let store = NotificationStore::open(
        &config.notification_db_path,
        config.network,
        config.notification_retention_secs,
    )?;

    let bind_addr = config.api_bind_addr.clone();
    let service = Arc::new(AutomationService::new(
        config,
        Arc::new(chain),
        Arc::new(ledger),
        Arc::new(store.clone()),
    ));

    service
        .health_check()
        .await
        .context("startup health check failed")?;

    let first_delay = if args.run_now {
        info!("⚡ --run-now given, running first cycle immediately");
        Duration::ZERO
    } else {
        match service.startup_recovery().await {
            RecoveryPlan::RunNow { reason } => {
                info!("Running first cycle now: {}", reason);
                Duration::ZERO
            }
            RecoveryPlan::WaitForExpiry { bet_id, delay } => {
                info!(
                    "Waiting {}s for bet {} to expire before the first cycle",
                    delay.as_secs(),
                    bet_id
                );
                delay
            }
        }
    };

    let scheduler = spawn_scheduler(service.clone(), first_delay);

    let app = create_router(AppState {
        store,
        status: service.status_handle(),
    });
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("🌐 Notification API listening on http://{}", bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        error!("Server error: {}", e);
    }

    info!("Stopping scheduler...");
    scheduler.shutdown().await;
    info!("👋 BetCycle stopped");

    served.context("Server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
