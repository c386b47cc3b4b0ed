//! Winner selection and pot split.
//!
//! Ties share the win: every entry at the minimal distance from the actual
//! value is a winner, and the pot after fee is split evenly between them
//! regardless of how close each one was.

use serde::{Deserialize, Serialize};

use super::error::BetError;
use crate::models::PlayerBet;

pub const BPS_DENOMINATOR: u128 = 10_000;

/// Indices (in placement order) of all entries minimizing `|guess - actual|`.
pub fn winner_indices(player_bets: &[PlayerBet], actual_value: u128) -> Vec<usize> {
    let Some(best) = player_bets
        .iter()
        .map(|pb| pb.guess.abs_diff(actual_value))
        .min()
    else {
        return Vec::new();
    };

    player_bets
        .iter()
        .enumerate()
        .filter(|(_, pb)| pb.guess.abs_diff(actual_value) == best)
        .map(|(i, _)| i)
        .collect()
}

/// Integer split of a settled pot.
///
/// `fee + per_winner * winners + remainder == total_pot` always holds. The
/// remainder is the rounding dust of the even split and stays with the house.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrizeSplit {
    pub total_pot: u128,
    pub fee: u128,
    pub prize_pool: u128,
    pub winners: usize,
    pub per_winner: u128,
    pub remainder: u128,
}

pub fn split_pot(total_pot: u128, fee_bps: u32, winners: usize) -> Result<PrizeSplit, BetError> {
    let fee = total_pot
        .checked_mul(fee_bps as u128)
        .ok_or(BetError::ArithmeticOverflow)?
        / BPS_DENOMINATOR;
    let prize_pool = total_pot
        .checked_sub(fee)
        .ok_or(BetError::ArithmeticOverflow)?;

    let (per_winner, remainder) = if winners == 0 {
        (0, prize_pool)
    } else {
        let k = winners as u128;
        let per_winner = prize_pool / k;
        (per_winner, prize_pool - per_winner * k)
    };

    Ok(PrizeSplit {
        total_pot,
        fee,
        prize_pool,
        winners,
        per_winner,
        remainder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    fn entries(guesses: &[u128]) -> Vec<PlayerBet> {
        guesses
            .iter()
            .enumerate()
            .map(|(i, &guess)| PlayerBet {
                player: Address::from_low_u64_be(i as u64 + 1),
                guess,
                claimed: false,
            })
            .collect()
    }

    #[test]
    fn test_closest_guess_wins() {
        assert_eq!(winner_indices(&entries(&[1000, 1500]), 1200), vec![0]);
        assert_eq!(winner_indices(&entries(&[100, 300]), 250), vec![1]);
    }

    #[test]
    fn test_ties_all_win() {
        assert_eq!(winner_indices(&entries(&[1000, 1000]), 1000), vec![0, 1]);
        // equidistant on both sides
        assert_eq!(winner_indices(&entries(&[900, 1100, 1300]), 1000), vec![0, 1]);
    }

    #[test]
    fn test_no_entries_no_winners() {
        assert!(winner_indices(&[], 42).is_empty());
    }

    #[test]
    fn test_winner_set_matches_minimum_distance() {
        let guesses = [5u128, 17, 17, 40, 3, 29, 17];
        for actual in [0u128, 10, 17, 23, 35, 100] {
            let bets = entries(&guesses);
            let winners = winner_indices(&bets, actual);
            let best = guesses.iter().map(|g| g.abs_diff(actual)).min().unwrap();
            let expected: Vec<usize> = guesses
                .iter()
                .enumerate()
                .filter(|(_, g)| g.abs_diff(actual) == best)
                .map(|(i, _)| i)
                .collect();
            assert_eq!(winners, expected, "actual={}", actual);
        }
    }

    #[test]
    fn test_single_winner_takes_pot_minus_fee() {
        let stake = 100_000_000_000_000_000u128;
        let split = split_pot(stake * 2, 500, 1).unwrap();
        assert_eq!(split.per_winner, stake * 2 * 95 / 100);
        assert_eq!(split.remainder, 0);
    }

    #[test]
    fn test_split_accounts_for_every_unit() {
        for pot in [0u128, 1, 99, 100, 1_000, 3_000_001, 299_999_999_999] {
            for k in 0..7usize {
                let s = split_pot(pot, 500, k).unwrap();
                assert_eq!(
                    s.fee + s.per_winner * k as u128 + s.remainder,
                    pot,
                    "pot={} k={}",
                    pot,
                    k
                );
                if k > 0 {
                    assert!(s.remainder < k as u128);
                }
            }
        }
    }

    #[test]
    fn test_three_way_pot_two_winners() {
        let stake = 100u128;
        let split = split_pot(stake * 3, 500, 2).unwrap();
        assert_eq!(split.fee, 15);
        assert_eq!(split.prize_pool, 285);
        assert_eq!(split.per_winner, 142);
        assert_eq!(split.remainder, 1);
    }

    #[test]
    fn test_overflow_is_reported() {
        assert_eq!(
            split_pot(u128::MAX, 500, 1),
            Err(BetError::ArithmeticOverflow)
        );
    }
}
