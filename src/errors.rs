//! Error taxonomy for ledger and settlement operations.
//!
//! Request-triggered operations return these to the caller directly; the
//! background sweeps log them and retry the affected unit on the next cycle.

use crate::money::{Amount, Blockchain, Currency, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient balance: need {needed} {currency}, have {available}")]
    InsufficientBalance {
        currency: Currency,
        needed: Amount,
        available: Amount,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(Amount),

    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("exchange rate unavailable for {0}")]
    RateUnavailable(Currency),

    #[error("chain transfer failed: {0}")]
    ChainTransferFailed(String),

    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("malformed block hash: {0}")]
    MalformedBlockHash(String),

    #[error("already processed: {0}")]
    AlreadyProcessed(String),

    #[error("bonus cap exceeded for user {user_id}")]
    BonusCapExceeded { user_id: UserId },

    #[error("member not found: {0}")]
    MemberNotFound(String),

    #[error("wallet not found for user {user_id} on {blockchain}")]
    WalletNotFound {
        user_id: UserId,
        blockchain: Blockchain,
    },

    #[error("bet rejected: {0}")]
    BetRejected(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid request signature")]
    InvalidSignature,

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
