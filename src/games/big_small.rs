//! Big/Small: the wagered amount picks the side, the block hash picks the
//! result.
//!
//! The side is `floor(amount) mod 10` (0..=4 Small, 5..=9 Big) and the block
//! side is the last hex digit of the hash mod 10 under the same threshold.
//! Tying the side to the literal amount is a house rule; the floor/mod
//! semantics must stay bit-for-bit for fairness audits.

use crate::config::GamesConfig;
use crate::errors::{EngineError, EngineResult};
use crate::games::types::Outcome;
use crate::money::Amount;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Small,
    Big,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Small => write!(f, "Small"),
            Direction::Big => write!(f, "Big"),
        }
    }
}

pub fn direction(amount: Amount) -> Direction {
    let last_digit = amount.whole_units().rem_euclid(10);
    if last_digit <= 4 {
        Direction::Small
    } else {
        Direction::Big
    }
}

fn block_side(block_hash: &str) -> EngineResult<Direction> {
    let last = block_hash
        .chars()
        .last()
        .ok_or_else(|| EngineError::MalformedBlockHash(block_hash.to_string()))?;
    let value = last
        .to_digit(16)
        .ok_or_else(|| EngineError::MalformedBlockHash(block_hash.to_string()))?
        % 10;
    Ok(if value <= 4 {
        Direction::Small
    } else {
        Direction::Big
    })
}

pub fn resolve(amount: Amount, block_hash: &str, games: &GamesConfig) -> EngineResult<Outcome> {
    let side = direction(amount);
    let result = block_side(block_hash)?;

    if side == result {
        let payout = amount
            .mul_ratio(games.odds_numerator, games.odds_denominator)
            .mul_ratio(
                games.fee_denominator - games.fee_numerator,
                games.fee_denominator,
            );
        Ok(Outcome::win(payout, result.to_string()))
    } else {
        Ok(Outcome::lose(result.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn games() -> GamesConfig {
        GamesConfig::default()
    }

    #[test]
    fn amount_24_against_block_digit_7_loses() {
        // 24 -> last whole digit 4 -> Small; hash digit 7 -> Big
        let outcome = resolve(Amount::from_units(24), "00ab7", &games()).unwrap();
        assert_eq!(outcome.status, crate::games::types::BetStatus::Lose);
        assert_eq!(outcome.payout, Amount::ZERO);
        assert_eq!(outcome.result, "Big");
    }

    #[test]
    fn matching_sides_pay_odds_minus_fee() {
        // 24 -> Small; hash digit 3 -> Small; 24 * 1.95 * 0.99 = 46.332
        let outcome = resolve(Amount::from_units(24), "00ab3", &games()).unwrap();
        assert_eq!(outcome.status, crate::games::types::BetStatus::Win);
        assert_eq!(outcome.payout, "46.332".parse().unwrap());
    }

    #[test]
    fn hex_letters_wrap_mod_10() {
        // 'f' = 15 -> 5 -> Big
        let outcome = resolve(Amount::from_units(19), "00abf", &games()).unwrap();
        assert_eq!(outcome.status, crate::games::types::BetStatus::Win);
    }

    #[test]
    fn fractional_amounts_floor_before_mod() {
        // 14.9 floors to 14 -> 4 -> Small
        assert_eq!(direction("14.9".parse().unwrap()), Direction::Small);
        assert_eq!(direction("15.1".parse().unwrap()), Direction::Big);
    }

    #[test]
    fn deterministic_resolution() {
        let a = resolve(Amount::from_units(24), "deadbeef", &games()).unwrap();
        let b = resolve(Amount::from_units(24), "deadbeef", &games()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_hash_is_rejected() {
        assert!(matches!(
            resolve(Amount::from_units(10), "", &games()),
            Err(EngineError::MalformedBlockHash(_))
        ));
    }
}
