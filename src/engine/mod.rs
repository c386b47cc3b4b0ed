//! Bet Lifecycle Engine
//!
//! The state machine a bet follows from creation to settlement or
//! cancellation, plus the claim rules that apply afterwards. The real
//! ledger executes these rules on-chain; this module is the reference
//! implementation used by the in-memory ledger and by the scheduler's
//! payout reporting.

pub mod book;
pub mod error;
pub mod payout;

pub use book::{BetBook, BookConfig, ClaimOutcome, Payment};
pub use error::BetError;
pub use payout::{split_pot, winner_indices, PrizeSplit};
