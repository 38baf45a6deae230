//! Banker/Player/Tie: the last digit of the stake in micro-units selects the
//! backed side (1 banker, 2 player, 3 tie); the hash ends of an 8-character
//! window decide the round.
//!
//! Side values sum only the decimal digits of their two characters (hex
//! letters count as zero), mod 10.

use crate::errors::{EngineError, EngineResult};
use crate::games::types::Outcome;
use crate::money::Amount;

const FEE_PERCENT: u32 = 1;
const TIE_ODDS: u32 = 8;
const SIDE_ODDS_NUMERATOR: u32 = 195;
const SIDE_ODDS_DENOMINATOR: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Banker,
    Player,
    Tie,
}

impl Side {
    fn name(&self) -> &'static str {
        match self {
            Side::Banker => "banker",
            Side::Player => "player",
            Side::Tie => "tie",
        }
    }
}

fn digit_sum(window: &str) -> u32 {
    window
        .chars()
        .map(|c| c.to_digit(10).unwrap_or(0))
        .sum::<u32>()
        % 10
}

pub fn resolve(amount: Amount, block_hash: &str) -> EngineResult<Outcome> {
    let chars: Vec<char> = block_hash.to_ascii_lowercase().chars().collect();
    if chars.len() < 8 {
        return Err(EngineError::MalformedBlockHash(block_hash.to_string()));
    }
    let window: String = chars[chars.len() - 8..].iter().collect();

    let bet_type = amount.last_micro_digit();
    let banker_val = digit_sum(&window[0..2]);
    let player_val = digit_sum(&window[6..8]);

    let result = if banker_val > player_val {
        Side::Banker
    } else if player_val > banker_val {
        Side::Player
    } else {
        Side::Tie
    };

    let payout = match result {
        Side::Tie => {
            if bet_type == 3 {
                amount.mul_int(TIE_ODDS).mul_ratio(100 - FEE_PERCENT, 100)
            } else {
                // Half the stake comes back on an unbacked tie.
                amount.mul_ratio(50, 100)
            }
        }
        Side::Banker if bet_type == 1 => amount
            .mul_ratio(SIDE_ODDS_NUMERATOR, SIDE_ODDS_DENOMINATOR)
            .mul_ratio(100 - FEE_PERCENT, 100),
        Side::Player if bet_type == 2 => amount
            .mul_ratio(SIDE_ODDS_NUMERATOR, SIDE_ODDS_DENOMINATOR)
            .mul_ratio(100 - FEE_PERCENT, 100),
        _ => Amount::ZERO,
    };

    let summary = format!(
        "banker={} player={} result={} bet_type={}",
        banker_val,
        player_val,
        result.name(),
        bet_type
    );

    if payout.is_positive() {
        Ok(Outcome::win(payout, summary))
    } else {
        Ok(Outcome::lose(summary))
    }
}
