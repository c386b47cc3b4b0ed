//! In-process ledger backed by the lifecycle engine
//!
//! Behaves like the deployed contract: ids from 1, atomic writes, the same
//! rejection reasons. Used by tests and by `bet_admin --simulate`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use ethers::types::Address;
use parking_lot::Mutex;
use tracing::warn;

use super::{Ledger, LedgerError, LedgerResult, TxReceipt};
use crate::engine::{BetBook, BookConfig, ClaimOutcome, Payment};
use crate::models::{
    AutomationData, BetId, BetInfo, Currency, NewBet, PlayerBet, SettlementAudit,
};

/// Write operations that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    Create,
    Settle,
    Cancel,
    Claim,
    Place,
    /// Reading the winner set
    Winners,
}

pub struct InMemoryLedger {
    book: Mutex<BetBook>,
    signer: Address,
    /// Fixed time in unix seconds; `None` follows the wall clock
    clock: Mutex<Option<i64>>,
    failing: Mutex<HashSet<LedgerOp>>,
    tx_counter: AtomicU64,
}

impl InMemoryLedger {
    /// Ledger owned by `signer`, which is also the identity used for writes.
    pub fn new(signer: Address, config: BookConfig) -> Self {
        Self {
            book: Mutex::new(BetBook::new(signer, config)),
            signer,
            clock: Mutex::new(None),
            failing: Mutex::new(HashSet::new()),
            tx_counter: AtomicU64::new(0),
        }
    }

    pub fn now(&self) -> i64 {
        self.clock
            .lock()
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    pub fn set_now(&self, now: i64) {
        *self.clock.lock() = Some(now);
    }

    pub fn advance(&self, secs: i64) {
        let now = self.now();
        *self.clock.lock() = Some(now + secs);
    }

    /// Make every subsequent `op` revert until cleared
    pub fn fail(&self, op: LedgerOp) {
        self.failing.lock().insert(op);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    pub fn place_bet_as(
        &self,
        player: Address,
        bet_id: BetId,
        guess: u128,
        payment: Payment,
    ) -> LedgerResult<TxReceipt> {
        self.check(LedgerOp::Place)?;
        let now = self.now();
        self.book
            .lock()
            .place_bet(player, bet_id, guess, payment, now)?;
        Ok(self.receipt())
    }

    pub fn claim_as(&self, player: Address, bet_id: BetId) -> LedgerResult<ClaimOutcome> {
        self.check(LedgerOp::Claim)?;
        Ok(self.book.lock().claim(player, bet_id)?)
    }

    fn check(&self, op: LedgerOp) -> LedgerResult<()> {
        if self.failing.lock().contains(&op) {
            warn!(?op, "Injected ledger failure");
            return Err(LedgerError::Reverted {
                reason: format!("injected {:?} failure", op),
            });
        }
        Ok(())
    }

    fn receipt(&self) -> TxReceipt {
        let n = self.tx_counter.fetch_add(1, Ordering::Relaxed) + 1;
        TxReceipt {
            tx_hash: format!("0x{:064x}", n),
        }
    }
}

#[async_trait::async_trait]
impl Ledger for InMemoryLedger {
    async fn active_bets(&self) -> LedgerResult<Vec<BetId>> {
        Ok(self.book.lock().active_bets())
    }

    async fn settled_bets(&self) -> LedgerResult<Vec<BetId>> {
        Ok(self.book.lock().settled_bets())
    }

    async fn bet_info(&self, bet_id: BetId) -> LedgerResult<BetInfo> {
        self.book
            .lock()
            .bet(bet_id)
            .map(|b| b.info())
            .ok_or(LedgerError::NotFound(bet_id))
    }

    async fn automation_data(&self, bet_id: BetId) -> LedgerResult<AutomationData> {
        self.book
            .lock()
            .bet(bet_id)
            .map(|b| b.automation.clone())
            .ok_or(LedgerError::NotFound(bet_id))
    }

    async fn bet_players(&self, bet_id: BetId) -> LedgerResult<Vec<PlayerBet>> {
        self.book
            .lock()
            .bet(bet_id)
            .map(|b| b.player_bets.clone())
            .ok_or(LedgerError::NotFound(bet_id))
    }

    async fn winner_indices(&self, bet_id: BetId) -> LedgerResult<Vec<usize>> {
        self.check(LedgerOp::Winners)?;
        self.book
            .lock()
            .winner_indices(bet_id)
            .map(<[usize]>::to_vec)
            .ok_or(LedgerError::NotFound(bet_id))
    }

    async fn create_bet(&self, bet: NewBet) -> LedgerResult<TxReceipt> {
        self.check(LedgerOp::Create)?;
        let now = self.now();
        self.book.lock().create_bet(self.signer, bet, now)?;
        Ok(self.receipt())
    }

    async fn settle_bet(
        &self,
        bet_id: BetId,
        actual_value: u128,
        audit: Option<SettlementAudit>,
    ) -> LedgerResult<TxReceipt> {
        self.check(LedgerOp::Settle)?;
        self.book
            .lock()
            .settle_bet(self.signer, bet_id, actual_value, audit)?;
        Ok(self.receipt())
    }

    async fn cancel_bet(&self, bet_id: BetId) -> LedgerResult<TxReceipt> {
        self.check(LedgerOp::Cancel)?;
        self.book.lock().cancel_bet(self.signer, bet_id)?;
        Ok(self.receipt())
    }

    async fn claim_prize(&self, bet_id: BetId) -> LedgerResult<TxReceipt> {
        self.claim_as(self.signer, bet_id)?;
        Ok(self.receipt())
    }

    async fn place_bet(&self, bet_id: BetId, guess: u128) -> LedgerResult<TxReceipt> {
        let (currency, amount) = {
            let book = self.book.lock();
            let bet = book.bet(bet_id).ok_or(LedgerError::NotFound(bet_id))?;
            (bet.currency, bet.bet_amount)
        };
        let payment = match currency {
            Currency::Native => Payment::Native(amount),
            Currency::Stable => Payment::StableAllowance(amount),
        };
        self.place_bet_as(self.signer, bet_id, guess, payment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BetError;
    use crate::models::BetStatus;

    const STAKE: u128 = 1_000;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn ledger() -> InMemoryLedger {
        let ledger = InMemoryLedger::new(addr(1), BookConfig::default());
        ledger.set_now(1_700_000_000);
        ledger
    }

    fn timed_bet(now: i64) -> NewBet {
        NewBet {
            category: "gas_used".to_string(),
            description: "Total gas used".to_string(),
            currency: Currency::Native,
            bet_amount: STAKE,
            start_time: now,
            end_time: now + 300,
            automation: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let ledger = ledger();
        let receipt = ledger.create_bet(timed_bet(ledger.now())).await.unwrap();
        assert!(receipt.tx_hash.starts_with("0x"));
        assert_eq!(ledger.active_bets().await.unwrap(), vec![1]);

        let info = ledger.bet_info(1).await.unwrap();
        assert_eq!(info.status, BetStatus::Active);
        assert_eq!(info.created_at, 1_700_000_000);
        assert!(matches!(
            ledger.bet_info(2).await,
            Err(LedgerError::NotFound(2))
        ));
    }

    #[tokio::test]
    async fn test_cutoff_follows_injected_clock() {
        let ledger = ledger();
        ledger.create_bet(timed_bet(ledger.now())).await.unwrap();

        ledger
            .place_bet_as(addr(2), 1, 10, Payment::Native(STAKE))
            .unwrap();
        ledger.advance(240);
        let err = ledger
            .place_bet_as(addr(3), 1, 20, Payment::Native(STAKE))
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Rejected(BetError::BettingClosed { bet_id: 1, .. })
        ));
        assert_eq!(ledger.bet_players(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_state_untouched() {
        let ledger = ledger();
        ledger.create_bet(timed_bet(ledger.now())).await.unwrap();
        ledger.fail(LedgerOp::Settle);

        let err = ledger.settle_bet(1, 5, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Reverted { .. }));
        assert_eq!(ledger.bet_info(1).await.unwrap().status, BetStatus::Active);

        ledger.cancel_bet(1).await.unwrap();
        assert_eq!(ledger.settled_bets().await.unwrap(), vec![1]);
        assert!(ledger.bet_info(1).await.unwrap().refund_mode);

        ledger.clear_failures();
        assert!(matches!(
            ledger.settle_bet(1, 5, None).await,
            Err(LedgerError::Rejected(BetError::BetNotActive(1)))
        ));
    }

    #[tokio::test]
    async fn test_gateway_place_pays_the_stake() {
        let ledger = ledger();
        ledger.create_bet(timed_bet(ledger.now())).await.unwrap();
        ledger.place_bet(1, 42).await.unwrap();
        ledger.place_bet_as(addr(7), 1, 50, Payment::Native(STAKE)).unwrap();

        ledger.settle_bet(1, 40, None).await.unwrap();
        assert_eq!(ledger.winner_indices(1).await.unwrap(), vec![0]);

        ledger.claim_prize(1).await.unwrap();
        assert!(matches!(
            ledger.claim_prize(1).await,
            Err(LedgerError::Rejected(BetError::AlreadyClaimed(1)))
        ));
        assert!(matches!(
            ledger.claim_as(addr(7), 1),
            Err(LedgerError::Rejected(BetError::NotAWinner(1)))
        ));
    }
}
