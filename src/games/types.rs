use crate::money::{Amount, Currency, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five hash game variants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    BigSmall,
    Lucky,
    NiuNiu,
    BankerPlayer,
    OddEven,
}

impl GameKind {
    /// Wire id used by operator integrations (1..=5).
    pub fn id(&self) -> u8 {
        match self {
            GameKind::BigSmall => 1,
            GameKind::Lucky => 2,
            GameKind::NiuNiu => 3,
            GameKind::BankerPlayer => 4,
            GameKind::OddEven => 5,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(GameKind::BigSmall),
            2 => Some(GameKind::Lucky),
            3 => Some(GameKind::NiuNiu),
            4 => Some(GameKind::BankerPlayer),
            5 => Some(GameKind::OddEven),
            _ => None,
        }
    }

    pub fn all() -> [GameKind; 5] {
        [
            GameKind::BigSmall,
            GameKind::Lucky,
            GameKind::NiuNiu,
            GameKind::BankerPlayer,
            GameKind::OddEven,
        ]
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameKind::BigSmall => "big_small",
            GameKind::Lucky => "lucky",
            GameKind::NiuNiu => "niuniu",
            GameKind::BankerPlayer => "banker_player",
            GameKind::OddEven => "odd_even",
        };
        write!(f, "{}", s)
    }
}

/// Settlement timing class of a bet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    OneMinute,
    ThreeMinute,
    Instant,
}

impl BatchType {
    pub fn id(&self) -> u8 {
        match self {
            BatchType::OneMinute => 1,
            BatchType::ThreeMinute => 2,
            BatchType::Instant => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(BatchType::OneMinute),
            2 => Some(BatchType::ThreeMinute),
            3 => Some(BatchType::Instant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Pending,
    Win,
    Lose,
}

/// Who staked the bet: an on-chain sender address (unauthenticated hash
/// game deposits) or a platform account wagering from its balance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BetOrigin {
    Address(String),
    User(UserId),
}

impl BetOrigin {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            BetOrigin::User(id) => Some(*id),
            BetOrigin::Address(_) => None,
        }
    }
}

/// A wager. Immutable once status leaves `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub origin: BetOrigin,
    pub game: GameKind,
    pub amount: Amount,
    pub currency: Currency,
    /// Amount-derived side for the games that have one, empty otherwise.
    pub direction: String,
    /// Block captured at placement; seeds settlement for captured-seed games.
    pub block_num: u64,
    pub batch: BatchType,
    pub status: BetStatus,
    pub payout: Amount,
    /// Human-readable settlement result.
    pub result: String,
    /// Audit digest over (bet id, block hash, result), set at settlement.
    pub receipt: Option<String>,
    /// Funding transfer for address bets, when known.
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Resolution of one bet against one block hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: BetStatus,
    pub payout: Amount,
    pub result: String,
}

impl Outcome {
    pub fn win(payout: Amount, result: impl Into<String>) -> Self {
        Self {
            status: BetStatus::Win,
            payout,
            result: result.into(),
        }
    }

    pub fn lose(result: impl Into<String>) -> Self {
        Self {
            status: BetStatus::Lose,
            payout: Amount::ZERO,
            result: result.into(),
        }
    }
}

/// Which block hash a game settles against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSource {
    /// The hash of the block captured at placement.
    CapturedBlock,
    /// The chain head at settlement time.
    CurrentBlock,
}
