//! Lucky (letter/number): wins when the last two hash characters are one
//! hex letter and one digit, in either order.

use crate::errors::{EngineError, EngineResult};
use crate::games::types::Outcome;
use crate::money::Amount;

const ODDS_NUMERATOR: u32 = 195;
const ODDS_DENOMINATOR: u32 = 100;
const PLATFORM_FEE_PERCENT: u32 = 1;

fn is_letter(c: char) -> bool {
    matches!(c, 'a'..='f' | 'A'..='F')
}

fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}

fn check_win(block_hash: &str) -> EngineResult<bool> {
    let tail: Vec<char> = block_hash.chars().rev().take(2).collect();
    if tail.len() < 2 {
        return Err(EngineError::MalformedBlockHash(block_hash.to_string()));
    }
    let (c2, c1) = (tail[0], tail[1]);
    Ok((is_digit(c1) && is_letter(c2)) || (is_letter(c1) && is_digit(c2)))
}

fn payout_for(amount: Amount) -> Amount {
    amount
        .mul_ratio(ODDS_NUMERATOR, ODDS_DENOMINATOR)
        .mul_ratio(100 - PLATFORM_FEE_PERCENT, 100)
}

pub fn resolve(amount: Amount, block_hash: &str) -> EngineResult<Outcome> {
    let tail: String = {
        let chars: Vec<char> = block_hash.chars().collect();
        chars[chars.len().saturating_sub(2)..].iter().collect()
    };
    if check_win(block_hash)? {
        Ok(Outcome::win(payout_for(amount), tail))
    } else {
        Ok(Outcome::lose(tail))
    }
}
