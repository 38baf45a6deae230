//! Provably-fair hash games.
//!
//! Each variant is a pure function of (stake, block hash): identical inputs
//! always produce the identical result and payout, so any settlement can be
//! re-derived by an auditor holding the block hash.

pub mod banker_player;
pub mod big_small;
pub mod lucky;
pub mod niu_niu;
pub mod odd_even;
pub mod types;

pub use types::{BatchType, Bet, BetOrigin, BetStatus, GameKind, Outcome, SeedSource};

use crate::config::GamesConfig;
use crate::errors::EngineResult;
use crate::money::Amount;

/// Resolve a stake against a block hash for the given game.
pub fn resolve(
    game: GameKind,
    amount: Amount,
    block_hash: &str,
    games: &GamesConfig,
) -> EngineResult<Outcome> {
    match game {
        GameKind::BigSmall => big_small::resolve(amount, block_hash, games),
        GameKind::Lucky => lucky::resolve(amount, block_hash),
        GameKind::NiuNiu => niu_niu::resolve(amount, block_hash),
        GameKind::BankerPlayer => banker_player::resolve(amount, block_hash),
        GameKind::OddEven => odd_even::resolve(amount, block_hash, games),
    }
}

/// The amount-derived side recorded on the bet at placement, for the games
/// that have one.
pub fn direction_for(game: GameKind, amount: Amount) -> String {
    match game {
        GameKind::BigSmall => big_small::direction(amount).to_string(),
        GameKind::OddEven => odd_even::direction(amount).to_string(),
        _ => String::new(),
    }
}

/// Which block hash the game settles against. Big/Small replays the block
/// captured at placement; the other variants read the chain head at
/// settlement time.
pub fn seed_source(game: GameKind) -> SeedSource {
    match game {
        GameKind::BigSmall => SeedSource::CapturedBlock,
        _ => SeedSource::CurrentBlock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_covers_every_variant() {
        for game in GameKind::all() {
            let outcome = resolve(
                game,
                Amount::from_units(10),
                "00000000deadbeef",
                &GamesConfig::default(),
            );
            assert!(outcome.is_ok(), "{} failed to resolve", game);
        }
    }

    #[test]
    fn only_directional_games_record_a_direction() {
        let stake = Amount::from_units(15);
        assert_eq!(direction_for(GameKind::BigSmall, stake), "Big");
        assert_eq!(direction_for(GameKind::OddEven, stake), "Odd");
        assert_eq!(direction_for(GameKind::Lucky, stake), "");
    }

    #[test]
    fn big_small_replays_its_captured_block() {
        assert_eq!(seed_source(GameKind::BigSmall), SeedSource::CapturedBlock);
        assert_eq!(seed_source(GameKind::NiuNiu), SeedSource::CurrentBlock);
    }
}
