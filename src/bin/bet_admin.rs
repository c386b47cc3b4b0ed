//! Manual operator CLI for the betting contract
//!
//! Usage:
//!   bet_admin list [--all]
//!   bet_admin show 12
//!   bet_admin create --category gas_used --description "..." --currency native --amount 100000000000000000
//!   bet_admin settle 12 --value 4200
//!   bet_admin cancel 12
//!   bet_admin compute --category burnt_fees --start-block 100 --end-block 120 --seed 7
//!
//! `--simulate` runs the same commands against a throwaway in-memory ledger.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use ethers::types::Address;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use betcycle_backend::{
    calculator::{SampleRange, SettlementCalculator, BET_CATEGORIES},
    chain_data::HttpChainReader,
    engine::BookConfig,
    init_tracing,
    ledger::{ContractLedger, InMemoryLedger, Ledger},
    load_env,
    models::{BetId, Currency, NewBet},
    AutomationConfig,
};

#[derive(Parser, Debug)]
#[command(name = "bet_admin")]
#[command(about = "Inspect and operate bets by hand")]
struct Args {
    /// Use an in-memory ledger instead of the deployed contract
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List active bets (and closed ones with --all)
    List {
        #[arg(long)]
        all: bool,
    },
    /// Show one bet with its players and automation data
    Show { bet_id: BetId },
    /// Create a manual bet
    Create {
        #[arg(long)]
        category: String,
        #[arg(long)]
        description: String,
        #[arg(long, value_enum, default_value = "native")]
        currency: CurrencyArg,
        /// Stake in the currency's smallest unit
        #[arg(long)]
        amount: u128,
        /// Give the bet a betting window of this many seconds from now
        #[arg(long)]
        window_secs: Option<i64>,
    },
    /// Settle with an operator-supplied actual value
    Settle {
        bet_id: BetId,
        #[arg(long)]
        value: u128,
    },
    /// Cancel and open refunds
    Cancel { bet_id: BetId },
    /// Dry-run a settlement calculation without touching the ledger
    Compute {
        #[arg(long)]
        category: String,
        #[arg(long)]
        start_block: u64,
        #[arg(long)]
        end_block: u64,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CurrencyArg {
    Native,
    Stable,
}

impl From<CurrencyArg> for Currency {
    fn from(arg: CurrencyArg) -> Self {
        match arg {
            CurrencyArg::Native => Currency::Native,
            CurrencyArg::Stable => Currency::Stable,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();
    let args = Args::parse();
    let config = AutomationConfig::from_env()?;

    if let Command::Compute {
        category,
        start_block,
        end_block,
        seed,
    } = &args.command
    {
        return compute(&config, category, *start_block, *end_block, *seed).await;
    }

    let ledger: Arc<dyn Ledger> = if args.simulate {
        info!("🧪 Simulating against an in-memory ledger");
        Arc::new(InMemoryLedger::new(
            Address::from_low_u64_be(1),
            BookConfig {
                fee_bps: config.fee_bps,
                cutoff_secs: config.betting_cutoff_secs,
            },
        ))
    } else {
        Arc::new(ContractLedger::connect(&config).await?)
    };

    match args.command {
        Command::List { all } => list(ledger.as_ref(), all).await,
        Command::Show { bet_id } => show(ledger.as_ref(), bet_id).await,
        Command::Create {
            category,
            description,
            currency,
            amount,
            window_secs,
        } => {
            if amount == 0 {
                bail!("amount must be positive");
            }
            let now = Utc::now().timestamp();
            let (start_time, end_time) = match window_secs {
                Some(w) if w > 0 => (now, now + w),
                Some(w) => bail!("window must be positive, got {}", w),
                None => (0, 0),
            };
            let receipt = ledger
                .create_bet(NewBet {
                    category,
                    description,
                    currency: currency.into(),
                    bet_amount: amount,
                    start_time,
                    end_time,
                    automation: None,
                })
                .await?;
            println!("created: {}", receipt.tx_hash);
            list(ledger.as_ref(), false).await
        }
        Command::Settle { bet_id, value } => {
            let receipt = ledger.settle_bet(bet_id, value, None).await?;
            println!("settled bet {}: {}", bet_id, receipt.tx_hash);
            show(ledger.as_ref(), bet_id).await
        }
        Command::Cancel { bet_id } => {
            let receipt = ledger.cancel_bet(bet_id).await?;
            println!("cancelled bet {}: {}", bet_id, receipt.tx_hash);
            Ok(())
        }
        Command::Compute { .. } => Ok(()),
    }
}

async fn list(ledger: &dyn Ledger, all: bool) -> Result<()> {
    let mut ids = ledger.active_bets().await?;
    if all {
        ids.extend(ledger.settled_bets().await?);
    }
    if ids.is_empty() {
        println!("no bets");
        return Ok(());
    }

    println!(
        "{:>5}  {:<9}  {:<18}  {:<6}  {:>24}  {:>7}  {:>12}",
        "id", "status", "category", "cur", "pot", "players", "ends"
    );
    for id in ids {
        let info = ledger.bet_info(id).await?;
        let ends = if info.end_time > 0 {
            info.end_time.to_string()
        } else {
            "-".to_string()
        };
        println!(
            "{:>5}  {:<9}  {:<18}  {:<6}  {:>24}  {:>7}  {:>12}",
            info.id,
            info.status.as_str(),
            info.category,
            info.currency.as_str(),
            info.total_pot,
            info.player_bet_count,
            ends
        );
    }
    Ok(())
}

async fn show(ledger: &dyn Ledger, bet_id: BetId) -> Result<()> {
    let info = ledger.bet_info(bet_id).await?;
    let automation = ledger.automation_data(bet_id).await?;
    let players = ledger.bet_players(bet_id).await?;
    let winners = ledger.winner_indices(bet_id).await?;

    println!("bet {} [{}] {}", info.id, info.status.as_str(), info.category);
    println!("  {}", info.description);
    println!(
        "  stake {} {}  pot {}  refund mode {}",
        info.bet_amount,
        info.currency.as_str(),
        info.total_pot,
        info.refund_mode
    );
    println!(
        "  created {}  window {} -> {}",
        info.created_at, info.start_time, info.end_time
    );
    if info.status.is_terminal() && !info.refund_mode {
        println!("  actual value {}", info.actual_value);
    }
    if automation.is_automated {
        println!(
            "  automated: blocks {} -> {}, {} sampled, {}",
            automation.start_block_height,
            automation.end_block_height,
            automation.sampled_blocks.len(),
            automation.calculation_method
        );
    }
    for (i, p) in players.iter().enumerate() {
        let marker = if winners.contains(&i) { "*" } else { " " };
        println!(
            "  {}{:>3} {:?} guess {} {}",
            marker,
            i,
            p.player,
            p.guess,
            if p.claimed { "(claimed)" } else { "" }
        );
    }
    Ok(())
}

async fn compute(
    config: &AutomationConfig,
    category: &str,
    start_block: u64,
    end_block: u64,
    seed: Option<u64>,
) -> Result<()> {
    if !BET_CATEGORIES.iter().any(|c| c.category == category) {
        let known: Vec<_> = BET_CATEGORIES.iter().map(|c| c.category).collect();
        return Err(anyhow!(
            "unknown category {}, expected one of {}",
            category,
            known.join(", ")
        ));
    }

    let reader = HttpChainReader::from_config(config)?;
    let calculator = SettlementCalculator::new(
        &reader,
        SampleRange {
            min: config.sample_size_min,
            max: config.sample_size_max,
        },
    );
    let mut rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let result = calculator
        .calculate(category, start_block, end_block, &mut rng)
        .await?;
    println!("value: {}", result.value);
    println!("details: {}", result.details);
    if !result.sampled_blocks.is_empty() {
        println!("sampled blocks: {:?}", result.sampled_blocks);
    }
    Ok(())
}
