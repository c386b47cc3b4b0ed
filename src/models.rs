use ethers::types::Address;
use serde::{Deserialize, Serialize};

pub type BetId = u64;

/// Stake currency of a bet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    Native,
    Stable,
}

impl Currency {
    pub fn as_str(&self) -> &str {
        match self {
            Currency::Native => "native",
            Currency::Stable => "stable",
        }
    }

    /// On-chain enum discriminant (`uint8 currencyType`)
    pub fn as_u8(&self) -> u8 {
        match self {
            Currency::Native => 0,
            Currency::Stable => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Currency::Native),
            1 => Some(Currency::Stable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Active,
    Settled,
    Cancelled,
}

impl BetStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BetStatus::Active => "active",
            BetStatus::Settled => "settled",
            BetStatus::Cancelled => "cancelled",
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            BetStatus::Active => 0,
            BetStatus::Settled => 1,
            BetStatus::Cancelled => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(BetStatus::Active),
            1 => Some(BetStatus::Settled),
            2 => Some(BetStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetStatus::Active)
    }
}

/// One participant's guess within a bet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerBet {
    pub player: Address,
    pub guess: u128,
    pub claimed: bool,
}

/// Block-range and sampling bookkeeping for bets created by the scheduler
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutomationData {
    pub start_block_height: u64,
    pub end_block_height: u64,
    pub sampled_blocks: Vec<u64>,
    pub calculation_method: String,
    pub calculation_details: String,
    pub is_automated: bool,
}

/// Full bet record as held by the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub category: String,
    pub description: String,
    pub currency: Currency,
    pub bet_amount: u128,
    /// Meaningless while the bet is active
    pub actual_value: u128,
    pub status: BetStatus,
    pub total_pot: u128,
    pub refund_mode: bool,
    pub created_at: i64,
    pub start_time: i64,
    /// 0 means the bet has no betting window
    pub end_time: i64,
    pub player_bets: Vec<PlayerBet>,
    pub winner_indices: Vec<usize>,
    pub automation: AutomationData,
}

impl Bet {
    pub fn info(&self) -> BetInfo {
        BetInfo {
            id: self.id,
            category: self.category.clone(),
            description: self.description.clone(),
            currency: self.currency,
            bet_amount: self.bet_amount,
            actual_value: self.actual_value,
            status: self.status,
            total_pot: self.total_pot,
            refund_mode: self.refund_mode,
            player_bet_count: self.player_bets.len(),
            created_at: self.created_at,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }

    pub fn player_index(&self, player: Address) -> Option<usize> {
        self.player_bets.iter().position(|pb| pb.player == player)
    }
}

/// Summary view of a bet (`getBetInfo`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BetInfo {
    pub id: BetId,
    pub category: String,
    pub description: String,
    pub currency: Currency,
    pub bet_amount: u128,
    pub actual_value: u128,
    pub status: BetStatus,
    pub total_pot: u128,
    pub refund_mode: bool,
    pub player_bet_count: usize,
    pub created_at: i64,
    pub start_time: i64,
    pub end_time: i64,
}

impl BetInfo {
    pub fn has_expired(&self, now: i64) -> bool {
        self.end_time > 0 && now >= self.end_time
    }
}

/// Parameters for creating a bet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBet {
    pub category: String,
    pub description: String,
    pub currency: Currency,
    pub bet_amount: u128,
    pub start_time: i64,
    pub end_time: i64,
    /// Present when the scheduler creates the bet
    pub automation: Option<AutomationSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationSeed {
    pub start_block_height: u64,
    pub calculation_method: String,
}

/// Audit trail attached to an automated settlement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementAudit {
    pub end_block_height: u64,
    pub sampled_blocks: Vec<u64>,
    pub details: String,
}

/// Output of a settlement strategy, fed verbatim into settlement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalculationResult {
    pub value: u128,
    pub sampled_blocks: Vec<u64>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Prize,
    Refund,
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::Prize => "prize",
            NotificationKind::Refund => "refund",
        }
    }
}

/// "You won, here is how much" entry shown to a participant until dismissed or expired
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WinnerNotification {
    pub bet_id: BetId,
    pub winner_address: String,
    pub bet_category: String,
    pub bet_description: String,
    /// Smallest currency unit, decimal string
    pub prize_amount: String,
    pub currency: Currency,
    pub kind: NotificationKind,
    pub settled_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}
