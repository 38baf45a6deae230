//! Ledger store: per-user, per-currency balances plus the append-only
//! transaction log.
//!
//! Balance rows only move through [`Ledger::credit`] and [`Ledger::debit`],
//! which are atomic read-modify-write operations scoped to one row. The
//! balance is the authoritative state; the log is the immutable audit trail
//! of every deposit, withdrawal and swap that produced it. On-chain deposits
//! are deduplicated by chain transaction id.

use crate::errors::{EngineError, EngineResult};
use crate::exchange::RateGateway;
use crate::money::{Amount, Currency, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Audit log entry classes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Deposit,
    Withdraw,
    Swap,
}

/// Append-only audit record. `amount` is signed: deposits positive,
/// withdrawals negative, swaps one of each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub seq: u64,
    pub user_id: UserId,
    pub address: String,
    pub amount: Amount,
    pub currency: Currency,
    pub tx_id: String,
    pub kind: TxKind,
    pub created_at: DateTime<Utc>,
}

pub struct Ledger {
    balances: DashMap<(UserId, Currency), Amount>,
    log: Mutex<Vec<TransactionRecord>>,
    credited_tx: DashMap<String, ()>,
    deposit_counts: DashMap<UserId, u64>,
    next_seq: AtomicU64,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            log: Mutex::new(Vec::new()),
            credited_tx: DashMap::new(),
            deposit_counts: DashMap::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Provision the USD row for a fresh account.
    pub fn open_account(&self, user_id: UserId) {
        self.balances
            .entry((user_id, Currency::Usd))
            .or_insert(Amount::ZERO);
    }

    pub fn balance(&self, user_id: UserId, currency: Currency) -> Option<Amount> {
        self.balances.get(&(user_id, currency)).map(|b| *b)
    }

    /// Atomically add `amount` to one balance row, creating it if missing.
    pub fn credit(
        &self,
        user_id: UserId,
        currency: Currency,
        amount: Amount,
    ) -> EngineResult<Amount> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount(amount));
        }
        let mut row = self.balances.entry((user_id, currency)).or_insert(Amount::ZERO);
        let updated = *row + amount;
        *row = updated;
        Ok(updated)
    }

    /// Atomically subtract `amount` from one balance row. The check and the
    /// write happen under the same row lock, so a concurrent debit can never
    /// observe the balance before this one lands.
    pub fn debit(
        &self,
        user_id: UserId,
        currency: Currency,
        amount: Amount,
    ) -> EngineResult<Amount> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount(amount));
        }
        let mut row = self.balances.entry((user_id, currency)).or_insert(Amount::ZERO);
        let current = *row;
        if current < amount {
            return Err(EngineError::InsufficientBalance {
                currency,
                needed: amount,
                available: current,
            });
        }
        let updated = current - amount;
        *row = updated;
        Ok(updated)
    }

    /// Credit a confirmed on-chain deposit exactly once.
    ///
    /// The chain transaction id is the idempotency key: replays (from a
    /// rescanning sweep cycle or a crash-recovery pass) return
    /// `DuplicateTransaction` without touching the balance. The audit row
    /// records what was swept; the balance credit is its USD valuation.
    pub fn apply_deposit(
        &self,
        user_id: UserId,
        address: &str,
        swept_amount: Amount,
        swept_currency: Currency,
        usd_amount: Amount,
        chain_tx_id: &str,
    ) -> EngineResult<Amount> {
        if !usd_amount.is_positive() {
            return Err(EngineError::InvalidAmount(usd_amount));
        }
        match self.credited_tx.entry(chain_tx_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EngineError::DuplicateTransaction(chain_tx_id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let updated = self.credit(user_id, Currency::Usd, usd_amount)?;
        self.append(
            user_id,
            address,
            swept_amount,
            swept_currency,
            chain_tx_id,
            TxKind::Deposit,
        );
        *self.deposit_counts.entry(user_id).or_insert(0) += 1;
        Ok(updated)
    }

    /// Number of deposits credited for a user. The referral engine uses this
    /// to detect first deposits.
    pub fn deposit_count(&self, user_id: UserId) -> u64 {
        self.deposit_counts.get(&user_id).map(|c| *c).unwrap_or(0)
    }

    /// Append the audit row for a completed on-chain withdrawal. The ledger
    /// debit happens separately through the dispatcher.
    pub fn record_withdrawal(
        &self,
        user_id: UserId,
        address: &str,
        amount: Amount,
        currency: Currency,
        chain_tx_id: &str,
    ) {
        self.append(user_id, address, -amount, currency, chain_tx_id, TxKind::Withdraw);
    }

    /// Exchange between two of a user's balances at the gateway's spot rate.
    pub async fn exchange(
        &self,
        gateway: &RateGateway,
        user_id: UserId,
        from: Currency,
        to: Currency,
        amount: Amount,
    ) -> EngineResult<Amount> {
        if from == to {
            return Err(EngineError::InvalidRequest(
                "cannot exchange a currency with itself".to_string(),
            ));
        }
        let converted = gateway.convert(amount, from, to).await?;
        if !converted.is_positive() {
            return Err(EngineError::InvalidAmount(converted));
        }

        self.debit(user_id, from, amount)?;
        self.credit(user_id, to, converted)?;
        self.append(user_id, "-", -amount, from, "", TxKind::Swap);
        self.append(user_id, "-", converted, to, "", TxKind::Swap);
        Ok(converted)
    }

    pub fn transactions_for(&self, user_id: UserId) -> Vec<TransactionRecord> {
        self.log
            .lock()
            .expect("transaction log poisoned")
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    fn append(
        &self,
        user_id: UserId,
        address: &str,
        amount: Amount,
        currency: Currency,
        tx_id: &str,
        kind: TxKind,
    ) {
        let record = TransactionRecord {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            user_id,
            address: address.to_string(),
            amount,
            currency,
            tx_id: tx_id.to_string(),
            kind,
            created_at: Utc::now(),
        };
        self.log.lock().expect("transaction log poisoned").push(record);
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
