//! BetCycle Backend Library
//!
//! Recurring on-chain prediction bets: lifecycle engine, settlement
//! calculator, ledger gateway and the automation scheduler that drives them.

pub mod api;
pub mod calculator;
pub mod chain_data;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod models;
pub mod notifications;
pub mod scheduler;

use std::path::Path;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::AutomationConfig;
pub use scheduler::{spawn_scheduler, AutomationService, SchedulerHandle};

/// Load `.env` from the working directory, then from the crate root.
pub fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidates = [manifest_dir.join(".env"), manifest_dir.join("../.env")];
    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "betcycle_backend=debug,betcycle=debug,bet_admin=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
