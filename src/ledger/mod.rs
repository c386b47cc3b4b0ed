//! Ledger Gateway
//!
//! Typed read/write access to the betting ledger. Every write is a single
//! atomic operation on the ledger side and returns once it is confirmed.

pub mod contract;
pub mod memory;

use crate::engine::BetError;
use crate::models::{
    AutomationData, BetId, BetInfo, NewBet, PlayerBet, SettlementAudit,
};

pub use contract::ContractLedger;
pub use memory::InMemoryLedger;

/// Confirmation of a ledger write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
}

#[derive(Debug, Clone)]
pub enum LedgerError {
    /// Rejected by the lifecycle rules before anything was applied
    Rejected(BetError),
    /// Transaction mined but reverted
    Reverted { reason: String },
    Transport(String),
    Decode(String),
    /// Sent but no receipt came back
    Unconfirmed(String),
    NotFound(BetId),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(e) => write!(f, "rejected: {}", e),
            Self::Reverted { reason } => write!(f, "transaction reverted: {}", reason),
            Self::Transport(msg) => write!(f, "ledger transport error: {}", msg),
            Self::Decode(msg) => write!(f, "ledger decode error: {}", msg),
            Self::Unconfirmed(msg) => write!(f, "transaction not confirmed: {}", msg),
            Self::NotFound(id) => write!(f, "bet {} not found on ledger", id),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<BetError> for LedgerError {
    fn from(e: BetError) -> Self {
        match e {
            BetError::BetNotFound(id) => LedgerError::NotFound(id),
            other => LedgerError::Rejected(other),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    async fn active_bets(&self) -> LedgerResult<Vec<BetId>>;

    /// Settled and cancelled bets
    async fn settled_bets(&self) -> LedgerResult<Vec<BetId>>;

    async fn bet_info(&self, bet_id: BetId) -> LedgerResult<BetInfo>;

    async fn automation_data(&self, bet_id: BetId) -> LedgerResult<AutomationData>;

    async fn bet_players(&self, bet_id: BetId) -> LedgerResult<Vec<PlayerBet>>;

    async fn winner_indices(&self, bet_id: BetId) -> LedgerResult<Vec<usize>>;

    /// Create a bet. The id is assigned by the ledger, so callers that need
    /// it re-read the active set.
    async fn create_bet(&self, bet: NewBet) -> LedgerResult<TxReceipt>;

    async fn settle_bet(
        &self,
        bet_id: BetId,
        actual_value: u128,
        audit: Option<SettlementAudit>,
    ) -> LedgerResult<TxReceipt>;

    async fn cancel_bet(&self, bet_id: BetId) -> LedgerResult<TxReceipt>;

    async fn claim_prize(&self, bet_id: BetId) -> LedgerResult<TxReceipt>;

    /// Place a guess as the gateway's own identity, paying the bet's stake
    async fn place_bet(&self, bet_id: BetId, guess: u128) -> LedgerResult<TxReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bet_not_found_maps_to_not_found() {
        assert!(matches!(
            LedgerError::from(BetError::BetNotFound(9)),
            LedgerError::NotFound(9)
        ));
        assert!(matches!(
            LedgerError::from(BetError::Unauthorized),
            LedgerError::Rejected(BetError::Unauthorized)
        ));
    }
}
