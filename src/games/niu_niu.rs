//! NiuNiu: banker and player hands are derived from two overlapping
//! 3-character windows over the last 5 hash characters.
//!
//! Each character counts as its digit value, or 10 for a letter. A hand's
//! points are the sum mod 10, with 0 promoted to 10.

use crate::errors::{EngineError, EngineResult};
use crate::games::types::Outcome;
use crate::money::Amount;

const PLAYER_SHARE_NUMERATOR: u32 = 95;
const HIGH_HAND_FEE_PERCENT: u32 = 10;
const TIE_FEE_PERCENT: u32 = 1;

fn char_value(c: char) -> u32 {
    c.to_digit(10).unwrap_or(10)
}

fn points(triple: &str) -> u32 {
    let sum: u32 = triple.chars().map(char_value).sum();
    let m = sum % 10;
    if m == 0 {
        10
    } else {
        m
    }
}

struct Hands {
    banker: u32,
    player: u32,
    banker_triple: String,
    player_triple: String,
}

fn compute(block_hash: &str) -> EngineResult<Hands> {
    let cleaned = block_hash.trim_start_matches("0x").to_ascii_lowercase();
    let chars: Vec<char> = cleaned.chars().collect();
    if chars.len() < 5 {
        return Err(EngineError::MalformedBlockHash(block_hash.to_string()));
    }
    let last5: String = chars[chars.len() - 5..].iter().collect();
    let banker_triple: String = last5[0..3].to_string();
    let player_triple: String = last5[2..5].to_string();
    Ok(Hands {
        banker: points(&banker_triple),
        player: points(&player_triple),
        banker_triple,
        player_triple,
    })
}

pub fn resolve(amount: Amount, block_hash: &str) -> EngineResult<Outcome> {
    let hands = compute(block_hash)?;
    let summary = format!(
        "banker({})=Niu{} player({})=Niu{}",
        hands.banker_triple, hands.banker, hands.player_triple, hands.player
    );

    if hands.player > hands.banker {
        // Winnings are stake x player-points at a 95% share, on top of a
        // 10x base. Hands of 9 or 10 points pay a 10% fee on the winnings
        // portion only.
        let winnings = amount.mul_ratio(PLAYER_SHARE_NUMERATOR, 100).mul_int(hands.player);
        let gross = amount.mul_int(10) + winnings;
        let fee = if hands.player >= 9 {
            winnings.mul_ratio(HIGH_HAND_FEE_PERCENT, 100)
        } else {
            Amount::ZERO
        };
        Ok(Outcome::win(gross - fee, format!("{} -> player", summary)))
    } else if hands.banker > hands.player {
        Ok(Outcome::lose(format!("{} -> banker", summary)))
    } else {
        // Push: 99% of the stake comes back.
        let refund = amount.mul_ratio(100 - TIE_FEE_PERCENT, 100);
        Ok(Outcome::win(refund, format!("{} -> tie", summary)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::BetStatus;

    #[test]
    fn points_promote_zero_to_ten() {
        assert_eq!(points("550"), 10);
        assert_eq!(points("123"), 6);
        assert_eq!(points("abc"), 10); // 30 % 10 = 0 -> 10
        assert_eq!(points("189"), 8);
    }

    #[test]
    fn banker_win_pays_nothing() {
        // last5 "12345": banker 123 -> 6, player 345 -> 2
        let outcome = resolve(Amount::from_units(10), "0012345").unwrap();
        assert_eq!(outcome.status, BetStatus::Lose);
        assert_eq!(outcome.payout, Amount::ZERO);
    }

    #[test]
    fn player_win_without_high_hand_fee() {
        // last5 "11189": banker 111 -> 3, player 189 -> 8
        // payout = 10*10 + 10*8*0.95 = 176
        let outcome = resolve(Amount::from_units(10), "0011189").unwrap();
        assert_eq!(outcome.status, BetStatus::Win);
        assert_eq!(outcome.payout, Amount::from_units(176));
    }

    #[test]
    fn nine_and_ten_point_hands_pay_fee_on_winnings() {
        // last5 "11550": banker 115 -> 7, player 550 -> 10
        // winnings = 10*10*0.95 = 95, fee = 9.5, payout = 100 + 95 - 9.5
        let outcome = resolve(Amount::from_units(10), "0011550").unwrap();
        assert_eq!(outcome.status, BetStatus::Win);
        assert_eq!(outcome.payout, "185.5".parse().unwrap());
    }

    #[test]
    fn tie_refunds_99_percent() {
        // last5 "11011": banker 110 -> 2, player 011 -> 2
        let outcome = resolve(Amount::from_units(100), "0011011").unwrap();
        assert_eq!(outcome.status, BetStatus::Win);
        assert_eq!(outcome.payout, Amount::from_units(99));
    }

    #[test]
    fn overlapping_windows_share_the_middle_character() {
        let hands = compute("ab9cd").unwrap();
        assert_eq!(hands.banker_triple, "ab9");
        assert_eq!(hands.player_triple, "9cd");
    }

    #[test]
    fn short_hash_is_rejected() {
        assert!(resolve(Amount::from_units(1), "abc").is_err());
    }
}
