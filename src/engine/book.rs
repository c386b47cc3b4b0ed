use std::collections::{BTreeMap, HashMap};

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::BetError;
use super::payout::{split_pot, winner_indices, PrizeSplit};
use crate::models::{
    AutomationData, Bet, BetId, BetStatus, Currency, NewBet, PlayerBet, SettlementAudit,
};

/// How a participant pays the stake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payment {
    /// Native coin attached to the call
    Native(u128),
    /// Stable token allowance previously approved for the ledger
    StableAllowance(u128),
}

/// Result of a successful claim
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClaimOutcome {
    Prize(u128),
    Refund(u128),
}

impl ClaimOutcome {
    pub fn amount(&self) -> u128 {
        match self {
            ClaimOutcome::Prize(a) | ClaimOutcome::Refund(a) => *a,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookConfig {
    pub fee_bps: u32,
    /// Trailing part of a timed bet's window in which guesses are refused
    pub cutoff_secs: i64,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            fee_bps: 500,
            cutoff_secs: 60,
        }
    }
}

/// Registry of all bets and the lifecycle state machine:
/// `Active -> Settled` or `Active -> Cancelled`, both terminal.
#[derive(Debug, Clone)]
pub struct BetBook {
    config: BookConfig,
    owner: Address,
    automation: Option<Address>,
    next_bet_id: BetId,
    bets: BTreeMap<BetId, Bet>,
    /// Terminal bets in the order they left the active set
    closed_order: Vec<BetId>,
    /// Per-bet pot split, fixed at settlement
    splits: HashMap<BetId, PrizeSplit>,
}

impl BetBook {
    pub fn new(owner: Address, config: BookConfig) -> Self {
        Self {
            config,
            owner,
            automation: None,
            next_bet_id: 1,
            bets: BTreeMap::new(),
            closed_order: Vec::new(),
            splits: HashMap::new(),
        }
    }

    pub fn next_bet_id(&self) -> BetId {
        self.next_bet_id
    }

    pub fn set_automation(&mut self, caller: Address, automation: Address) -> Result<(), BetError> {
        if caller != self.owner {
            return Err(BetError::Unauthorized);
        }
        self.automation = Some(automation);
        Ok(())
    }

    pub fn is_operator(&self, who: Address) -> bool {
        who == self.owner || self.automation == Some(who)
    }

    fn require_operator(&self, caller: Address) -> Result<(), BetError> {
        if self.is_operator(caller) {
            Ok(())
        } else {
            Err(BetError::Unauthorized)
        }
    }

    pub fn create_bet(&mut self, caller: Address, new: NewBet, now: i64) -> Result<BetId, BetError> {
        self.require_operator(caller)?;
        if new.bet_amount == 0 {
            return Err(BetError::InvalidBetAmount);
        }
        if new.end_time != 0 && new.start_time > new.end_time {
            return Err(BetError::InvalidTimeWindow {
                start_time: new.start_time,
                end_time: new.end_time,
            });
        }

        let id = self.next_bet_id;
        self.next_bet_id += 1;

        let automation = match new.automation {
            Some(seed) => AutomationData {
                start_block_height: seed.start_block_height,
                calculation_method: seed.calculation_method,
                is_automated: true,
                ..Default::default()
            },
            None => AutomationData::default(),
        };

        self.bets.insert(
            id,
            Bet {
                id,
                category: new.category,
                description: new.description,
                currency: new.currency,
                bet_amount: new.bet_amount,
                actual_value: 0,
                status: BetStatus::Active,
                total_pot: 0,
                refund_mode: false,
                created_at: now,
                start_time: new.start_time,
                end_time: new.end_time,
                player_bets: Vec::new(),
                winner_indices: Vec::new(),
                automation,
            },
        );

        info!(bet_id = id, "🆕 Bet created");
        Ok(id)
    }

    pub fn place_bet(
        &mut self,
        player: Address,
        bet_id: BetId,
        guess: u128,
        payment: Payment,
        now: i64,
    ) -> Result<(), BetError> {
        let cutoff_secs = self.config.cutoff_secs;
        let bet = self
            .bets
            .get_mut(&bet_id)
            .ok_or(BetError::BetNotFound(bet_id))?;

        if bet.status != BetStatus::Active {
            return Err(BetError::BetNotActive(bet_id));
        }
        if bet.end_time > 0 {
            let cutoff_at = bet.end_time - cutoff_secs;
            if now >= cutoff_at {
                return Err(BetError::BettingClosed { bet_id, cutoff_at });
            }
        }

        match (bet.currency, payment) {
            (Currency::Native, Payment::Native(value)) => {
                if value != bet.bet_amount {
                    return Err(BetError::InvalidBetAmount);
                }
            }
            (Currency::Stable, Payment::StableAllowance(approved)) => {
                if approved < bet.bet_amount {
                    return Err(BetError::InsufficientAllowance {
                        required: bet.bet_amount,
                        approved,
                    });
                }
            }
            (expected, _) => return Err(BetError::WrongCurrency { expected }),
        }

        if bet.player_index(player).is_some() {
            return Err(BetError::PlayerAlreadyBet(bet_id));
        }

        let total_pot = bet
            .total_pot
            .checked_add(bet.bet_amount)
            .ok_or(BetError::ArithmeticOverflow)?;

        bet.player_bets.push(PlayerBet {
            player,
            guess,
            claimed: false,
        });
        bet.total_pot = total_pot;

        debug!(bet_id, ?player, guess, "Player bet placed");
        Ok(())
    }

    pub fn settle_bet(
        &mut self,
        caller: Address,
        bet_id: BetId,
        actual_value: u128,
        audit: Option<SettlementAudit>,
    ) -> Result<Vec<usize>, BetError> {
        self.require_operator(caller)?;
        let fee_bps = self.config.fee_bps;
        let bet = self
            .bets
            .get_mut(&bet_id)
            .ok_or(BetError::BetNotFound(bet_id))?;
        if bet.status != BetStatus::Active {
            return Err(BetError::BetNotActive(bet_id));
        }

        let winners = winner_indices(&bet.player_bets, actual_value);
        let split = split_pot(bet.total_pot, fee_bps, winners.len())?;

        bet.status = BetStatus::Settled;
        bet.actual_value = actual_value;
        bet.winner_indices = winners.clone();
        if let Some(audit) = audit {
            bet.automation.end_block_height = audit.end_block_height;
            bet.automation.sampled_blocks = audit.sampled_blocks;
            bet.automation.calculation_details = audit.details;
        }

        self.splits.insert(bet_id, split);
        self.closed_order.push(bet_id);

        info!(
            bet_id,
            actual_value,
            winners = winners.len(),
            per_winner = split.per_winner,
            "🏁 Bet settled"
        );
        Ok(winners)
    }

    pub fn cancel_bet(&mut self, caller: Address, bet_id: BetId) -> Result<(), BetError> {
        self.require_operator(caller)?;
        let bet = self
            .bets
            .get_mut(&bet_id)
            .ok_or(BetError::BetNotFound(bet_id))?;
        if bet.status != BetStatus::Active {
            return Err(BetError::BetNotActive(bet_id));
        }

        bet.status = BetStatus::Cancelled;
        bet.refund_mode = true;
        self.closed_order.push(bet_id);

        info!(bet_id, "🚫 Bet cancelled, refunds open");
        Ok(())
    }

    /// Single claim entry point: refund on cancelled bets, prize on settled ones.
    pub fn claim(&mut self, player: Address, bet_id: BetId) -> Result<ClaimOutcome, BetError> {
        let split = self.splits.get(&bet_id).copied();
        let bet = self
            .bets
            .get_mut(&bet_id)
            .ok_or(BetError::BetNotFound(bet_id))?;

        if bet.status == BetStatus::Active {
            return Err(BetError::BetNotSettled(bet_id));
        }

        let index = bet
            .player_index(player)
            .ok_or(BetError::NotAParticipant(bet_id))?;
        if bet.player_bets[index].claimed {
            return Err(BetError::AlreadyClaimed(bet_id));
        }

        let outcome = if bet.refund_mode {
            ClaimOutcome::Refund(bet.bet_amount)
        } else {
            if !bet.winner_indices.contains(&index) {
                return Err(BetError::NotAWinner(bet_id));
            }
            let split = split.ok_or(BetError::BetNotSettled(bet_id))?;
            ClaimOutcome::Prize(split.per_winner)
        };

        bet.player_bets[index].claimed = true;
        info!(bet_id, ?player, amount = outcome.amount(), "💸 Claim paid");
        Ok(outcome)
    }

    pub fn bet(&self, bet_id: BetId) -> Option<&Bet> {
        self.bets.get(&bet_id)
    }

    pub fn winner_indices(&self, bet_id: BetId) -> Option<&[usize]> {
        self.bets.get(&bet_id).map(|b| b.winner_indices.as_slice())
    }

    pub fn active_bets(&self) -> Vec<BetId> {
        self.bets
            .values()
            .filter(|b| b.status == BetStatus::Active)
            .map(|b| b.id)
            .collect()
    }

    /// Terminal bets (settled or cancelled) in transition order
    pub fn settled_bets(&self) -> Vec<BetId> {
        self.closed_order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AutomationSeed;

    const STAKE: u128 = 100_000_000_000_000_000;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn owner() -> Address {
        addr(0xA11CE)
    }

    fn book() -> BetBook {
        BetBook::new(owner(), BookConfig::default())
    }

    fn manual(currency: Currency, amount: u128) -> NewBet {
        NewBet {
            category: "test".to_string(),
            description: "test".to_string(),
            currency,
            bet_amount: amount,
            start_time: 0,
            end_time: 0,
            automation: None,
        }
    }

    fn pot_matches_stakes(book: &BetBook, id: BetId) -> bool {
        let bet = book.bet(id).unwrap();
        bet.player_bets.len() as u128 * bet.bet_amount == bet.total_pot
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let mut b = book();
        assert_eq!(b.next_bet_id(), 1);
        let a = b.create_bet(owner(), manual(Currency::Native, STAKE), 0).unwrap();
        let c = b.create_bet(owner(), manual(Currency::Stable, 10), 0).unwrap();
        assert_eq!((a, c), (1, 2));
        assert_eq!(b.active_bets(), vec![1, 2]);
    }

    #[test]
    fn test_create_rejections() {
        let mut b = book();
        assert_eq!(
            b.create_bet(addr(5), manual(Currency::Native, STAKE), 0),
            Err(BetError::Unauthorized)
        );
        assert_eq!(
            b.create_bet(owner(), manual(Currency::Native, 0), 0),
            Err(BetError::InvalidBetAmount)
        );
        let mut backwards = manual(Currency::Native, STAKE);
        backwards.start_time = 200;
        backwards.end_time = 100;
        assert!(matches!(
            b.create_bet(owner(), backwards, 0),
            Err(BetError::InvalidTimeWindow { .. })
        ));
        assert_eq!(b.next_bet_id(), 1);
    }

    #[test]
    fn test_automation_identity_is_operator() {
        let mut b = book();
        let bot = addr(0xB07);
        assert_eq!(b.set_automation(bot, bot), Err(BetError::Unauthorized));
        b.set_automation(owner(), bot).unwrap();

        let mut new = manual(Currency::Native, STAKE);
        new.automation = Some(AutomationSeed {
            start_block_height: 1_000,
            calculation_method: "sum".to_string(),
        });
        let id = b.create_bet(bot, new, 10).unwrap();
        let bet = b.bet(id).unwrap();
        assert!(bet.automation.is_automated);
        assert_eq!(bet.automation.start_block_height, 1_000);
        assert_eq!(bet.created_at, 10);
    }

    #[test]
    fn test_native_bets_update_pot() {
        let mut b = book();
        let id = b.create_bet(owner(), manual(Currency::Native, STAKE), 0).unwrap();
        b.place_bet(addr(1), id, 1000, Payment::Native(STAKE), 0).unwrap();
        b.place_bet(addr(2), id, 2000, Payment::Native(STAKE), 0).unwrap();
        assert_eq!(b.bet(id).unwrap().total_pot, STAKE * 2);
        assert!(pot_matches_stakes(&b, id));
    }

    #[test]
    fn test_place_bet_rejections_leave_state_untouched() {
        let mut b = book();
        let native = b.create_bet(owner(), manual(Currency::Native, STAKE), 0).unwrap();
        let stable = b.create_bet(owner(), manual(Currency::Stable, 10_000_000), 0).unwrap();

        assert_eq!(
            b.place_bet(addr(1), native, 1, Payment::Native(STAKE / 2), 0),
            Err(BetError::InvalidBetAmount)
        );
        assert_eq!(
            b.place_bet(addr(1), native, 1, Payment::StableAllowance(STAKE), 0),
            Err(BetError::WrongCurrency {
                expected: Currency::Native
            })
        );
        assert_eq!(
            b.place_bet(addr(1), stable, 1, Payment::Native(10_000_000), 0),
            Err(BetError::WrongCurrency {
                expected: Currency::Stable
            })
        );
        assert_eq!(
            b.place_bet(addr(1), stable, 1, Payment::StableAllowance(9_999_999), 0),
            Err(BetError::InsufficientAllowance {
                required: 10_000_000,
                approved: 9_999_999
            })
        );
        assert_eq!(
            b.place_bet(addr(1), 99, 1, Payment::Native(STAKE), 0),
            Err(BetError::BetNotFound(99))
        );

        b.place_bet(addr(1), native, 1000, Payment::Native(STAKE), 0).unwrap();
        assert_eq!(
            b.place_bet(addr(1), native, 1500, Payment::Native(STAKE), 0),
            Err(BetError::PlayerAlreadyBet(native))
        );

        assert_eq!(b.bet(native).unwrap().player_bets.len(), 1);
        assert_eq!(b.bet(native).unwrap().total_pot, STAKE);
        assert_eq!(b.bet(stable).unwrap().total_pot, 0);
    }

    #[test]
    fn test_stable_allowance_takes_exact_stake() {
        let mut b = book();
        let id = b.create_bet(owner(), manual(Currency::Stable, 10), 0).unwrap();
        b.place_bet(addr(1), id, 5, Payment::StableAllowance(1_000), 0).unwrap();
        assert_eq!(b.bet(id).unwrap().total_pot, 10);
    }

    #[test]
    fn test_cutoff_window_closes_betting() {
        let mut b = book();
        let mut timed = manual(Currency::Native, STAKE);
        timed.start_time = 1_000;
        timed.end_time = 1_300;
        let id = b.create_bet(owner(), timed, 1_000).unwrap();

        b.place_bet(addr(1), id, 1, Payment::Native(STAKE), 1_239).unwrap();
        assert_eq!(
            b.place_bet(addr(2), id, 1, Payment::Native(STAKE), 1_240),
            Err(BetError::BettingClosed {
                bet_id: id,
                cutoff_at: 1_240
            })
        );
        // still nominally active
        assert_eq!(b.bet(id).unwrap().status, BetStatus::Active);
    }

    #[test]
    fn test_settle_picks_closest_and_moves_bet() {
        let mut b = book();
        let id = b.create_bet(owner(), manual(Currency::Native, STAKE), 0).unwrap();
        b.place_bet(addr(1), id, 1000, Payment::Native(STAKE), 0).unwrap();
        b.place_bet(addr(2), id, 1500, Payment::Native(STAKE), 0).unwrap();
        assert!(pot_matches_stakes(&b, id));

        assert_eq!(
            b.settle_bet(addr(1), id, 1200, None),
            Err(BetError::Unauthorized)
        );
        let winners = b.settle_bet(owner(), id, 1200, None).unwrap();
        assert_eq!(winners, vec![0]);
        assert!(b.active_bets().is_empty());
        assert_eq!(b.settled_bets(), vec![id]);

        let bet = b.bet(id).unwrap();
        assert_eq!(bet.status, BetStatus::Settled);
        assert_eq!(bet.actual_value, 1200);
        assert!(!bet.refund_mode);
    }

    #[test]
    fn test_no_transition_out_of_terminal_states() {
        let mut b = book();
        let settled = b.create_bet(owner(), manual(Currency::Native, STAKE), 0).unwrap();
        let cancelled = b.create_bet(owner(), manual(Currency::Native, STAKE), 0).unwrap();
        b.settle_bet(owner(), settled, 1, None).unwrap();
        b.cancel_bet(owner(), cancelled).unwrap();

        assert_eq!(b.settle_bet(owner(), settled, 2, None), Err(BetError::BetNotActive(settled)));
        assert_eq!(b.cancel_bet(owner(), settled), Err(BetError::BetNotActive(settled)));
        assert_eq!(b.settle_bet(owner(), cancelled, 2, None), Err(BetError::BetNotActive(cancelled)));
        assert_eq!(b.cancel_bet(owner(), cancelled), Err(BetError::BetNotActive(cancelled)));
        assert_eq!(
            b.place_bet(addr(1), settled, 1, Payment::Native(STAKE), 0),
            Err(BetError::BetNotActive(settled))
        );
        assert_eq!(b.bet(settled).unwrap().actual_value, 1);
    }

    #[test]
    fn test_settle_without_players_has_no_winners() {
        let mut b = book();
        let id = b.create_bet(owner(), manual(Currency::Native, STAKE), 0).unwrap();
        let audit = SettlementAudit {
            end_block_height: 120,
            sampled_blocks: vec![101, 117],
            details: "sampled".to_string(),
        };
        assert!(b.settle_bet(owner(), id, 7, Some(audit)).unwrap().is_empty());
        let bet = b.bet(id).unwrap();
        assert_eq!(bet.status, BetStatus::Settled);
        assert_eq!(bet.automation.sampled_blocks, vec![101, 117]);
        assert_eq!(bet.automation.end_block_height, 120);
    }

    #[test]
    fn test_tied_winners_split_evenly_and_claim_once() {
        let mut b = book();
        let id = b.create_bet(owner(), manual(Currency::Native, STAKE), 0).unwrap();
        b.place_bet(addr(1), id, 1000, Payment::Native(STAKE), 0).unwrap();
        b.place_bet(addr(2), id, 1000, Payment::Native(STAKE), 0).unwrap();
        b.place_bet(addr(3), id, 1500, Payment::Native(STAKE), 0).unwrap();
        assert_eq!(b.settle_bet(owner(), id, 1000, None).unwrap(), vec![0, 1]);

        let pot = STAKE * 3;
        let expected = (pot - pot * 5 / 100) / 2;
        assert_eq!(b.claim(addr(1), id), Ok(ClaimOutcome::Prize(expected)));
        assert_eq!(b.claim(addr(2), id), Ok(ClaimOutcome::Prize(expected)));

        let before = b.bet(id).unwrap().clone();
        assert_eq!(b.claim(addr(1), id), Err(BetError::AlreadyClaimed(id)));
        assert_eq!(b.claim(addr(3), id), Err(BetError::NotAWinner(id)));
        assert_eq!(b.claim(addr(9), id), Err(BetError::NotAParticipant(id)));
        let after = b.bet(id).unwrap();
        assert_eq!(before.player_bets, after.player_bets);
    }

    #[test]
    fn test_claim_before_settlement_is_rejected() {
        let mut b = book();
        let id = b.create_bet(owner(), manual(Currency::Native, STAKE), 0).unwrap();
        b.place_bet(addr(1), id, 1000, Payment::Native(STAKE), 0).unwrap();
        assert_eq!(b.claim(addr(1), id), Err(BetError::BetNotSettled(id)));
    }

    #[test]
    fn test_refunds_return_exact_stake_and_never_exceed_pot() {
        let mut b = book();
        let id = b.create_bet(owner(), manual(Currency::Stable, 1_000_000), 0).unwrap();
        for p in 1..=4 {
            b.place_bet(addr(p), id, p as u128, Payment::StableAllowance(1_000_000), 0)
                .unwrap();
        }
        assert_eq!(b.cancel_bet(addr(1), id), Err(BetError::Unauthorized));
        b.cancel_bet(owner(), id).unwrap();
        let bet = b.bet(id).unwrap();
        assert!(bet.refund_mode);
        assert!(bet.winner_indices.is_empty());

        let mut refunded = 0u128;
        for p in 1..=4 {
            let out = b.claim(addr(p), id).unwrap();
            assert_eq!(out, ClaimOutcome::Refund(1_000_000));
            refunded += out.amount();
            assert_eq!(b.claim(addr(p), id), Err(BetError::AlreadyClaimed(id)));
        }
        assert_eq!(refunded, b.bet(id).unwrap().total_pot);
    }

    #[test]
    fn test_gas_used_scenario_single_winner() {
        let mut b = book();
        let mut new = manual(Currency::Native, STAKE);
        new.category = "gas_used".to_string();
        new.start_time = 0;
        new.end_time = 300;
        let id = b.create_bet(owner(), new, 0).unwrap();
        assert_eq!(id, 1);
        b.place_bet(addr(1), id, 100, Payment::Native(STAKE), 10).unwrap();
        b.place_bet(addr(2), id, 300, Payment::Native(STAKE), 20).unwrap();

        assert_eq!(b.settle_bet(owner(), id, 250, None).unwrap(), vec![1]);
        let pot = STAKE * 2;
        assert_eq!(b.claim(addr(2), id), Ok(ClaimOutcome::Prize(pot * 95 / 100)));
        assert_eq!(b.claim(addr(1), id), Err(BetError::NotAWinner(id)));
    }
}
