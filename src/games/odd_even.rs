//! Odd/Even: the last significant decimal digit of the stake picks the side,
//! the last hash character picks the result. A trailing letter counts as
//! Even.

use crate::config::GamesConfig;
use crate::errors::{EngineError, EngineResult};
use crate::games::types::Outcome;
use crate::money::Amount;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Odd,
    Even,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Odd => write!(f, "Odd"),
            Direction::Even => write!(f, "Even"),
        }
    }
}

pub fn direction(amount: Amount) -> Direction {
    if amount.last_significant_decimal_digit() % 2 == 0 {
        Direction::Even
    } else {
        Direction::Odd
    }
}

fn block_side(block_hash: &str) -> EngineResult<Direction> {
    let last = block_hash
        .chars()
        .last()
        .ok_or_else(|| EngineError::MalformedBlockHash(block_hash.to_string()))?;
    Ok(match last.to_digit(10) {
        Some(d) if d % 2 == 1 => Direction::Odd,
        // Letters are treated as Even.
        _ => Direction::Even,
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
