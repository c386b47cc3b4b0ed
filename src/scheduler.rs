//! Automation Scheduler
//!
//! One cycle at a time: settle due bets, notify, create the next bet, clean
//! up. The loop task is owned by a [`SchedulerHandle`]; shutdown only ever
//! interrupts the sleep between cycles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::calculator::{CalculationError, SampleRange, SettlementCalculator, BET_CATEGORIES};
use crate::chain_data::ChainDataReader;
use crate::config::{AutomationConfig, CurrencyPolicy};
use crate::engine::split_pot;
use crate::ledger::{Ledger, LedgerError};
use crate::models::{
    AutomationData, AutomationSeed, BetId, BetInfo, Currency, NewBet, NotificationKind,
    SettlementAudit, WinnerNotification,
};
use crate::notifications::NotificationSink;

#[derive(Debug, Clone)]
pub enum CycleError {
    ChainData(String),
    Ledger(LedgerError),
    /// Settle and cancel both failed; these bets need an operator
    StuckBets(Vec<BetId>),
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChainData(msg) => write!(f, "chain data unavailable: {}", msg),
            Self::Ledger(e) => write!(f, "ledger error: {}", e),
            Self::StuckBets(ids) => write!(
                f,
                "bets {:?} could be neither settled nor cancelled, manual intervention required",
                ids
            ),
        }
    }
}

impl std::error::Error for CycleError {}

/// What happened to one due bet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled { winners: Vec<usize>, tx_hash: String },
    Cancelled { reason: String, tx_hash: String },
    /// Validation-class failure, left active for an operator
    Alert { reason: String },
    Stuck { settle_error: String, cancel_error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub current_height: u64,
    pub settled: Vec<BetId>,
    pub cancelled: Vec<BetId>,
    pub alerts: Vec<BetId>,
    pub stuck: Vec<BetId>,
    pub created_bet: bool,
    pub notifications_written: usize,
    pub notifications_purged: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatus {
    pub running: bool,
    pub last_cycle_started_at: Option<i64>,
    pub last_cycle_finished_at: Option<i64>,
    pub last_error: Option<String>,
    pub last_report: Option<CycleReport>,
    pub next_run_in_secs: Option<u64>,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub stuck_bets: Vec<BetId>,
    pub alerts: Vec<BetId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryPlan {
    RunNow { reason: String },
    WaitForExpiry { bet_id: BetId, delay: Duration },
}

impl RecoveryPlan {
    pub fn delay(&self) -> Duration {
        match self {
            RecoveryPlan::RunNow { .. } => Duration::ZERO,
            RecoveryPlan::WaitForExpiry { delay, .. } => *delay,
        }
    }
}

pub struct AutomationService {
    config: AutomationConfig,
    chain: Arc<dyn ChainDataReader>,
    ledger: Arc<dyn Ledger>,
    sink: Arc<dyn NotificationSink>,
    rng: Mutex<ChaCha8Rng>,
    status: Arc<RwLock<AutomationStatus>>,
}

impl AutomationService {
    pub fn new(
        config: AutomationConfig,
        chain: Arc<dyn ChainDataReader>,
        ledger: Arc<dyn Ledger>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => {
                info!("🎲 Using fixed RNG seed {}", seed);
                ChaCha8Rng::seed_from_u64(seed)
            }
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            config,
            chain,
            ledger,
            sink,
            rng: Mutex::new(rng),
            status: Arc::new(RwLock::new(AutomationStatus::default())),
        }
    }

    pub fn status_handle(&self) -> Arc<RwLock<AutomationStatus>> {
        self.status.clone()
    }

    pub fn status(&self) -> AutomationStatus {
        self.status.read().clone()
    }

    /// Fresh generator for one unit of work, so no lock is held across awaits
    fn child_rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.rng.lock().gen())
    }

    fn sample_range(&self) -> SampleRange {
        SampleRange {
            min: self.config.sample_size_min,
            max: self.config.sample_size_max,
        }
    }

    /// Chain reader and ledger must answer; the notification store may not.
    pub async fn health_check(&self) -> Result<()> {
        let height = self
            .chain
            .get_latest_height()
            .await
            .map_err(|e| anyhow!("chain data reader unhealthy: {:#}", e))?;
        let active = self
            .ledger
            .active_bets()
            .await
            .map_err(|e| anyhow!("ledger unhealthy: {}", e))?;
        if let Err(e) = self.sink.health_check().await {
            warn!("⚠️ Notification store unhealthy, continuing without it: {:#}", e);
        }
        info!(
            "✅ Health check passed: latest block {}, {} active bets",
            height,
            active.len()
        );
        Ok(())
    }

    pub async fn startup_recovery(&self) -> RecoveryPlan {
        self.startup_recovery_at(Utc::now().timestamp()).await
    }

    pub async fn startup_recovery_at(&self, now: i64) -> RecoveryPlan {
        let latest = match self.latest_automated_bet().await {
            Ok(latest) => latest,
            Err(e) => {
                warn!("Startup recovery could not read the ledger: {}", e);
                return RecoveryPlan::RunNow {
                    reason: format!("recovery failed: {}", e),
                };
            }
        };

        let plan = match latest {
            None => RecoveryPlan::RunNow {
                reason: "no active automated bet".to_string(),
            },
            Some(info) if info.end_time <= now => RecoveryPlan::RunNow {
                reason: format!("bet {} already expired", info.id),
            },
            Some(info) => RecoveryPlan::WaitForExpiry {
                bet_id: info.id,
                delay: Duration::from_secs((info.end_time - now) as u64),
            },
        };
        info!("🔄 Startup recovery: {:?}", plan);
        plan
    }

    async fn latest_automated_bet(&self) -> Result<Option<BetInfo>, LedgerError> {
        let mut latest: Option<BetInfo> = None;
        for bet_id in self.ledger.active_bets().await? {
            let automation = self.ledger.automation_data(bet_id).await?;
            if !automation.is_automated {
                continue;
            }
            let info = self.ledger.bet_info(bet_id).await?;
            // the round that closes last decides the wait
            let newer = latest
                .as_ref()
                .map(|l| (info.end_time, info.id) > (l.end_time, l.id))
                .unwrap_or(true);
            if newer {
                latest = Some(info);
            }
        }
        Ok(latest)
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        self.run_cycle_at(Utc::now().timestamp()).await
    }

    /// Run one full cycle as of `now` and record the outcome in the status.
    pub async fn run_cycle_at(&self, now: i64) -> Result<CycleReport, CycleError> {
        {
            let mut status = self.status.write();
            status.running = true;
            status.last_cycle_started_at = Some(now);
        }
        info!("⏰ Automation cycle starting");

        let result = self.cycle(now).await;

        let mut status = self.status.write();
        status.running = false;
        status.last_cycle_finished_at = Some(Utc::now().timestamp());
        match &result {
            Ok(report) => {
                status.cycles_completed += 1;
                status.last_error = None;
                status.stuck_bets.clear();
                status.alerts = report.alerts.clone();
                status.last_report = Some(report.clone());
            }
            Err(e) => {
                status.cycles_failed += 1;
                status.last_error = Some(e.to_string());
                if let CycleError::StuckBets(ids) = e {
                    status.stuck_bets = ids.clone();
                }
            }
        }
        result
    }

    async fn cycle(&self, now: i64) -> Result<CycleReport, CycleError> {
        let current_height = self
            .chain
            .get_latest_height()
            .await
            .map_err(|e| CycleError::ChainData(format!("{:#}", e)))?;
        info!("📦 Current block height: {}", current_height);

        let mut report = CycleReport {
            current_height,
            ..Default::default()
        };

        for (info, outcome) in self.settle_expired_bets(now, current_height).await? {
            match outcome {
                SettleOutcome::Settled { tx_hash, .. } => {
                    report.settled.push(info.id);
                    report.notifications_written += self.track_winners(&info, &tx_hash, now).await;
                }
                SettleOutcome::Cancelled { tx_hash, .. } => {
                    report.cancelled.push(info.id);
                    report.notifications_written +=
                        self.track_cancellation(&info, &tx_hash, now).await;
                }
                SettleOutcome::Alert { .. } => report.alerts.push(info.id),
                SettleOutcome::Stuck { .. } => report.stuck.push(info.id),
            }
        }

        if !report.stuck.is_empty() {
            self.cleanup(now).await;
            return Err(CycleError::StuckBets(report.stuck));
        }

        self.create_new_bet(now, current_height).await?;
        report.created_bet = true;
        report.notifications_purged = self.cleanup(now).await;

        info!(
            settled = report.settled.len(),
            cancelled = report.cancelled.len(),
            alerts = report.alerts.len(),
            "✅ Automation cycle complete"
        );
        Ok(report)
    }

    /// Settle every automated bet whose window has closed, sequentially.
    pub async fn settle_expired_bets(
        &self,
        now: i64,
        current_height: u64,
    ) -> Result<Vec<(BetInfo, SettleOutcome)>, CycleError> {
        let active = self.ledger.active_bets().await.map_err(CycleError::Ledger)?;
        debug!("{} active bets on ledger", active.len());

        let mut outcomes = Vec::new();
        for bet_id in active {
            let (info, automation) = match self.read_bet(bet_id).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(bet_id, "Skipping bet, could not read it: {}", e);
                    continue;
                }
            };
            if !automation.is_automated || !info.has_expired(now) {
                continue;
            }

            let outcome = self.settle_bet(&info, &automation, current_height).await;
            outcomes.push((info, outcome));
        }
        Ok(outcomes)
    }

    async fn read_bet(&self, bet_id: BetId) -> Result<(BetInfo, AutomationData), LedgerError> {
        let info = self.ledger.bet_info(bet_id).await?;
        let automation = self.ledger.automation_data(bet_id).await?;
        Ok((info, automation))
    }

    async fn settle_bet(
        &self,
        info: &BetInfo,
        automation: &AutomationData,
        current_height: u64,
    ) -> SettleOutcome {
        let bet_id = info.id;
        let end_block = automation
            .start_block_height
            .saturating_add(self.config.expected_blocks_per_window())
            .min(current_height);
        info!(
            bet_id,
            category = %info.category,
            "🎯 Settling bet over blocks {}-{}",
            automation.start_block_height,
            end_block
        );

        let mut rng = self.child_rng();
        let calculator = SettlementCalculator::new(self.chain.as_ref(), self.sample_range());
        let calculated = calculator
            .calculate(
                &info.category,
                automation.start_block_height,
                end_block,
                &mut rng,
            )
            .await;

        let settle_error = match calculated {
            Ok(result) => {
                info!(bet_id, value = result.value, "📊 {}", result.details);
                let audit = SettlementAudit {
                    end_block_height: end_block,
                    sampled_blocks: result.sampled_blocks,
                    details: result.details,
                };
                match self.ledger.settle_bet(bet_id, result.value, Some(audit)).await {
                    Ok(receipt) => {
                        let winners = match self.ledger.winner_indices(bet_id).await {
                            Ok(winners) => winners,
                            Err(e) => {
                                warn!(bet_id, "Could not read winners after settlement: {}", e);
                                Vec::new()
                            }
                        };
                        info!(bet_id, tx = %receipt.tx_hash, "🏆 Bet settled");
                        return SettleOutcome::Settled {
                            winners,
                            tx_hash: receipt.tx_hash,
                        };
                    }
                    Err(e) => e.to_string(),
                }
            }
            Err(e @ CalculationError::UnknownCategory(_)) => {
                error!(
                    bet_id,
                    "🚨 Cannot settle bet, left active for review: {}", e
                );
                return SettleOutcome::Alert {
                    reason: e.to_string(),
                };
            }
            Err(e) => e.to_string(),
        };

        warn!(
            bet_id,
            "⚠️ Settlement failed ({}), cancelling so players can claim refunds", settle_error
        );
        match self.ledger.cancel_bet(bet_id).await {
            Ok(receipt) => {
                info!(bet_id, tx = %receipt.tx_hash, "🚫 Bet cancelled");
                SettleOutcome::Cancelled {
                    reason: settle_error,
                    tx_hash: receipt.tx_hash,
                }
            }
            Err(cancel_error) => {
                error!(
                    bet_id,
                    settle_error = %settle_error,
                    cancel_error = %cancel_error,
                    "🚨 CRITICAL: bet could be neither settled nor cancelled, manual intervention required"
                );
                SettleOutcome::Stuck {
                    settle_error,
                    cancel_error: cancel_error.to_string(),
                }
            }
        }
    }

    /// Prize notices for every winner of a settled bet. Best-effort; returns
    /// how many were written.
    pub async fn track_winners(&self, info: &BetInfo, tx_hash: &str, now: i64) -> usize {
        let bet_id = info.id;
        let (info, players, winners) = match async {
            let info = self.ledger.bet_info(bet_id).await?;
            let players = self.ledger.bet_players(bet_id).await?;
            let winners = self.ledger.winner_indices(bet_id).await?;
            Ok::<_, LedgerError>((info, players, winners))
        }
        .await
        {
            Ok(read) => read,
            Err(e) => {
                warn!(bet_id, "Could not read winners for notifications: {}", e);
                return 0;
            }
        };

        if winners.is_empty() {
            debug!(bet_id, "No winners to notify");
            return 0;
        }

        let split = match split_pot(info.total_pot, self.config.fee_bps, winners.len()) {
            Ok(split) => split,
            Err(e) => {
                warn!(bet_id, "Could not compute prize: {}", e);
                return 0;
            }
        };
        info!(
            bet_id,
            winners = winners.len(),
            per_winner = split.per_winner,
            "💰 Recording winner notifications"
        );

        let mut written = 0;
        for index in winners {
            let Some(player) = players.get(index) else {
                warn!(bet_id, index, "Winner index out of range");
                continue;
            };
            let notification = WinnerNotification {
                bet_id,
                winner_address: format!("{:?}", player.player),
                bet_category: info.category.clone(),
                bet_description: info.description.clone(),
                prize_amount: split.per_winner.to_string(),
                currency: info.currency,
                kind: NotificationKind::Prize,
                settled_at: timestamp(now),
                tx_hash: Some(tx_hash.to_string()),
            };
            written += self.record(&notification, now).await;
        }
        written
    }

    /// Refund notices for every participant of a cancelled bet
    pub async fn track_cancellation(&self, info: &BetInfo, tx_hash: &str, now: i64) -> usize {
        let bet_id = info.id;
        let players = match self.ledger.bet_players(bet_id).await {
            Ok(players) => players,
            Err(e) => {
                warn!(bet_id, "Could not read players for refund notifications: {}", e);
                return 0;
            }
        };

        let mut written = 0;
        for player in players {
            let notification = WinnerNotification {
                bet_id,
                winner_address: format!("{:?}", player.player),
                bet_category: info.category.clone(),
                bet_description: format!("CANCELLED: {}", info.description),
                prize_amount: info.bet_amount.to_string(),
                currency: info.currency,
                kind: NotificationKind::Refund,
                settled_at: timestamp(now),
                tx_hash: Some(tx_hash.to_string()),
            };
            written += self.record(&notification, now).await;
        }
        written
    }

    async fn record(&self, notification: &WinnerNotification, now: i64) -> usize {
        match self.sink.record(notification, now).await {
            Ok(()) => 1,
            Err(e) => {
                warn!(
                    bet_id = notification.bet_id,
                    "Failed to store notification: {:#}", e
                );
                0
            }
        }
    }

    pub async fn create_new_bet(&self, now: i64, current_height: u64) -> Result<(), CycleError> {
        let mut rng = self.child_rng();
        let category = &BET_CATEGORIES[rng.gen_range(0..BET_CATEGORIES.len())];

        let currency = match self.config.currency_policy {
            CurrencyPolicy::Native => Currency::Native,
            CurrencyPolicy::Stable => Currency::Stable,
            CurrencyPolicy::Random => {
                if rng.gen_bool(0.5) {
                    Currency::Native
                } else {
                    Currency::Stable
                }
            }
        };
        let bet_amount = match currency {
            Currency::Native => self.config.native_stake_wei,
            Currency::Stable => self.config.stable_stake_units,
        };

        let new_bet = NewBet {
            category: category.category.to_string(),
            description: category.description.to_string(),
            currency,
            bet_amount,
            start_time: now,
            end_time: now + self.config.bet_window_secs,
            automation: Some(AutomationSeed {
                start_block_height: current_height,
                calculation_method: category.calculation_method.to_string(),
            }),
        };

        let receipt = self
            .ledger
            .create_bet(new_bet)
            .await
            .map_err(CycleError::Ledger)?;
        info!(
            category = category.category,
            currency = currency.as_str(),
            start_block = current_height,
            tx = %receipt.tx_hash,
            "🆕 New automated bet created"
        );
        Ok(())
    }

    /// Expire old notifications; never fails the cycle.
    pub async fn cleanup(&self, now: i64) -> usize {
        match self.sink.purge_expired(now).await {
            Ok(n) => {
                if n > 0 {
                    info!("🧹 Purged {} expired notifications", n);
                }
                n
            }
            Err(e) => {
                warn!("Notification cleanup failed: {:#}", e);
                0
            }
        }
    }
}

fn timestamp(now: i64) -> String {
    chrono::DateTime::from_timestamp(now, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

/// Owns the scheduler task
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop after the running cycle, if any, and wait for the task.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }
}

pub fn spawn_scheduler(service: Arc<AutomationService>, first_delay: Duration) -> SchedulerHandle {
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

    let task = tokio::spawn(async move {
        let mut delay = first_delay;
        loop {
            service.status.write().next_run_in_secs = Some(delay.as_secs());
            info!("⏳ Next automation cycle in {}s", delay.as_secs());

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => {
                    info!("🛑 Scheduler shutting down");
                    break;
                }
            }

            delay = match service.run_cycle().await {
                Ok(_) => service.config.cycle_interval(),
                Err(e) => {
                    error!("❌ Automation cycle failed, retrying soon: {}", e);
                    service.config.retry_interval()
                }
            };
        }
        service.status.write().next_run_in_secs = None;
    });

    SchedulerHandle { shutdown_tx, task }
}
