//! Full automated cycle against the in-memory ledger and a SQLite
//! notification store.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use ethers::types::Address;
use tempfile::TempDir;

use betcycle_backend::{
    chain_data::{Block, ChainDataReader},
    config::{AutomationConfig, CurrencyPolicy, Network},
    engine::{BookConfig, ClaimOutcome, Payment},
    ledger::{memory::LedgerOp, InMemoryLedger, Ledger},
    models::{AutomationSeed, BetStatus, Currency, NewBet, NotificationKind},
    notifications::NotificationStore,
    scheduler::{AutomationService, RecoveryPlan},
};

const T0: i64 = 1_700_000_000;
const STAKE: u128 = 100_000_000_000_000_000;

struct StaticChain {
    blocks: BTreeMap<u64, Block>,
}

impl StaticChain {
    /// Heights 1_000..=1_040; only block 1_010 used any gas
    fn new() -> Self {
        let blocks = (1_000..=1_040)
            .map(|h| {
                (
                    h,
                    Block {
                        height: h,
                        base_fee_per_gas: Some(1_000_000_000),
                        gas_used: Some(if h == 1_010 { 250 } else { 0 }),
                        burnt_fees: Some(0),
                    },
                )
            })
            .collect();
        Self { blocks }
    }
}

#[async_trait::async_trait]
impl ChainDataReader for StaticChain {
    async fn get_block(&self, height: u64) -> Result<Block> {
        self.blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| anyhow!("block {} not found", height))
    }

    async fn get_block_range(&self, lo: u64, hi: u64) -> Vec<Block> {
        self.blocks.range(lo..=hi).map(|(_, b)| b.clone()).collect()
    }

    async fn get_latest_height(&self) -> Result<u64> {
        Ok(1_040)
    }

    async fn get_external_price(&self) -> Result<f64> {
        Ok(0.9)
    }
}

fn player(n: u64) -> Address {
    Address::from_low_u64_be(0x1000 + n)
}

struct Setup {
    _dir: TempDir,
    ledger: Arc<InMemoryLedger>,
    store: NotificationStore,
    service: AutomationService,
}

fn setup() -> Setup {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("notifications.db");
    let store =
        NotificationStore::open(db.to_str().unwrap(), Network::Testnet, 30 * 24 * 3_600).unwrap();

    let ledger = Arc::new(InMemoryLedger::new(
        Address::from_low_u64_be(1),
        BookConfig::default(),
    ));
    ledger.set_now(T0);

    let config = AutomationConfig {
        network: Network::Testnet,
        currency_policy: CurrencyPolicy::Native,
        native_stake_wei: STAKE,
        rng_seed: Some(42),
        ..AutomationConfig::default()
    };
    let service = AutomationService::new(
        config,
        Arc::new(StaticChain::new()),
        ledger.clone(),
        Arc::new(store.clone()),
    );

    Setup {
        _dir: dir,
        ledger,
        store,
        service,
    }
}

async fn create_gas_used_bet(ledger: &InMemoryLedger) -> u64 {
    ledger
        .create_bet(NewBet {
            category: "gas_used".to_string(),
            description: "Total gas used in randomly sampled blocks over next 5 minutes"
                .to_string(),
            currency: Currency::Native,
            bet_amount: STAKE,
            start_time: T0,
            end_time: T0 + 300,
            automation: Some(AutomationSeed {
                start_block_height: 1_000,
                calculation_method: "Sum gas_used from 40-60 randomly sampled blocks".to_string(),
            }),
        })
        .await
        .unwrap();
    *ledger.active_bets().await.unwrap().last().unwrap()
}

#[tokio::test]
async fn closest_guess_wins_the_pot_minus_fee() {
    let s = setup();
    let bet_id = create_gas_used_bet(&s.ledger).await;
    assert_eq!(bet_id, 1);

    s.ledger
        .place_bet_as(player(1), bet_id, 100, Payment::Native(STAKE))
        .unwrap();
    s.ledger
        .place_bet_as(player(2), bet_id, 300, Payment::Native(STAKE))
        .unwrap();

    // still inside the window: recovery waits for expiry
    let plan = s.service.startup_recovery_at(T0 + 60).await;
    assert_eq!(plan.delay().as_secs(), 240);
    assert!(matches!(plan, RecoveryPlan::WaitForExpiry { bet_id: 1, .. }));

    s.ledger.set_now(T0 + 300);
    let report = s.service.run_cycle_at(T0 + 300).await.unwrap();
    assert_eq!(report.settled, vec![bet_id]);
    assert!(report.created_bet);

    let info = s.ledger.bet_info(bet_id).await.unwrap();
    assert_eq!(info.status, BetStatus::Settled);
    assert_eq!(info.actual_value, 250);
    assert_eq!(info.total_pot, 2 * STAKE);
    assert_eq!(s.ledger.winner_indices(bet_id).await.unwrap(), vec![1]);

    let prize = 2 * STAKE * 95 / 100;
    let notices = s
        .store
        .list_for(&format!("{:?}", player(2)), T0 + 301)
        .await
        .unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NotificationKind::Prize);
    assert_eq!(notices[0].prize_amount, prize.to_string());
    assert!(s
        .store
        .list_for(&format!("{:?}", player(1)), T0 + 301)
        .await
        .unwrap()
        .is_empty());

    assert_eq!(
        s.ledger.claim_as(player(2), bet_id).unwrap(),
        ClaimOutcome::Prize(prize)
    );
    assert!(s.ledger.claim_as(player(2), bet_id).is_err());
    assert!(s.ledger.claim_as(player(1), bet_id).is_err());

    // the cycle opened the next round
    let next = s.ledger.active_bets().await.unwrap();
    assert_eq!(next, vec![2]);
    let automation = s.ledger.automation_data(2).await.unwrap();
    assert_eq!(automation.start_block_height, 1_040);
}

#[tokio::test]
async fn failed_settlement_refunds_every_player() {
    let s = setup();
    let bet_id = create_gas_used_bet(&s.ledger).await;
    for (n, guess) in [(1, 10), (2, 20), (3, 30)] {
        s.ledger
            .place_bet_as(player(n), bet_id, guess, Payment::Native(STAKE))
            .unwrap();
    }
    s.ledger.fail(LedgerOp::Settle);

    let report = s.service.run_cycle_at(T0 + 400).await.unwrap();
    assert_eq!(report.cancelled, vec![bet_id]);
    assert_eq!(report.notifications_written, 3);

    let mut refunded = 0;
    for n in 1..=3 {
        let notices = s
            .store
            .list_for(&format!("{:?}", player(n)), T0 + 400)
            .await
            .unwrap();
        assert_eq!(notices[0].kind, NotificationKind::Refund);
        assert!(notices[0].bet_description.starts_with("CANCELLED: "));

        match s.ledger.claim_as(player(n), bet_id).unwrap() {
            ClaimOutcome::Refund(amount) => refunded += amount,
            other => panic!("expected refund, got {:?}", other),
        }
    }
    assert_eq!(refunded, s.ledger.bet_info(bet_id).await.unwrap().total_pot);
}

#[tokio::test]
async fn stuck_bet_blocks_new_rounds_until_resolved() {
    let s = setup();
    let bet_id = create_gas_used_bet(&s.ledger).await;
    s.ledger.fail(LedgerOp::Settle);
    s.ledger.fail(LedgerOp::Cancel);

    assert!(s.service.run_cycle_at(T0 + 300).await.is_err());
    assert_eq!(s.ledger.active_bets().await.unwrap(), vec![bet_id]);
    assert_eq!(s.service.status().stuck_bets, vec![bet_id]);

    s.ledger.clear_failures();
    let report = s.service.run_cycle_at(T0 + 360).await.unwrap();
    assert_eq!(report.settled, vec![bet_id]);
    assert_eq!(s.ledger.settled_bets().await.unwrap(), vec![bet_id]);
}
