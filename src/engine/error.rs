use crate::models::{BetId, Currency};

/// Rejection reasons for lifecycle operations. A rejected operation never
/// leaves partial state behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BetError {
    Unauthorized,
    InvalidBetAmount,
    InvalidTimeWindow { start_time: i64, end_time: i64 },
    BetNotFound(BetId),
    BetNotActive(BetId),
    BettingClosed { bet_id: BetId, cutoff_at: i64 },
    WrongCurrency { expected: Currency },
    PlayerAlreadyBet(BetId),
    InsufficientAllowance { required: u128, approved: u128 },
    BetNotSettled(BetId),
    NotAParticipant(BetId),
    AlreadyClaimed(BetId),
    NotAWinner(BetId),
    ArithmeticOverflow,
}

impl std::fmt::Display for BetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "caller is not an operator"),
            Self::InvalidBetAmount => write!(f, "invalid bet amount"),
            Self::InvalidTimeWindow {
                start_time,
                end_time,
            } => write!(
                f,
                "invalid betting window: start {} is after end {}",
                start_time, end_time
            ),
            Self::BetNotFound(id) => write!(f, "bet {} does not exist", id),
            Self::BetNotActive(id) => write!(f, "bet {} is not active", id),
            Self::BettingClosed { bet_id, cutoff_at } => {
                write!(f, "betting on bet {} closed at {}", bet_id, cutoff_at)
            }
            Self::WrongCurrency { expected } => {
                write!(f, "wrong currency, bet expects {}", expected.as_str())
            }
            Self::PlayerAlreadyBet(id) => write!(f, "player already placed a bet on {}", id),
            Self::InsufficientAllowance { required, approved } => write!(
                f,
                "insufficient stable allowance: required {}, approved {}",
                required, approved
            ),
            Self::BetNotSettled(id) => write!(f, "bet {} is not settled", id),
            Self::NotAParticipant(id) => write!(f, "caller has no entry in bet {}", id),
            Self::AlreadyClaimed(id) => write!(f, "already claimed on bet {}", id),
            Self::NotAWinner(id) => write!(f, "caller did not win bet {}", id),
            Self::ArithmeticOverflow => write!(f, "arithmetic overflow"),
        }
    }
}

impl std::error::Error for BetError {}
