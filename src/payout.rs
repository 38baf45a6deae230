//! Pending payout obligations.
//!
//! A payout is owed either to a platform user (resolved by a ledger credit)
//! or to an external address (resolved by an on-chain transfer). Completion
//! is a compare-and-swap on the status: a payout pays out at most once.

use crate::errors::{EngineError, EngineResult};
use crate::ledger::Ledger;
use crate::money::{Amount, Currency, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: String,
    /// Set for balance-account beneficiaries.
    pub user_id: Option<UserId>,
    /// Set for external-address beneficiaries.
    pub to: Option<String>,
    pub amount: Amount,
    pub currency: Currency,
    pub status: PayoutStatus,
    pub created_at: DateTime<Utc>,
    /// Transfer id once an external payout has been broadcast.
    pub settlement_tx_id: Option<String>,
}

pub struct PayoutBook {
    payouts: DashMap<String, Payout>,
}

impl PayoutBook {
    pub fn new() -> Self {
        Self {
            payouts: DashMap::new(),
        }
    }

    pub fn create_for_user(&self, user_id: UserId, amount: Amount, currency: Currency) -> Payout {
        self.insert(Payout {
            id: Uuid::new_v4().to_string(),
            user_id: Some(user_id),
            to: None,
            amount,
            currency,
            status: PayoutStatus::Pending,
            created_at: Utc::now(),
            settlement_tx_id: None,
        })
    }

    pub fn create_for_address(&self, to: &str, amount: Amount, currency: Currency) -> Payout {
        self.insert(Payout {
            id: Uuid::new_v4().to_string(),
            user_id: None,
            to: Some(to.to_string()),
            amount,
            currency,
            status: PayoutStatus::Pending,
            created_at: Utc::now(),
            settlement_tx_id: None,
        })
    }

    fn insert(&self, payout: Payout) -> Payout {
        self.payouts.insert(payout.id.clone(), payout.clone());
        payout
    }

    pub fn get(&self, id: &str) -> Option<Payout> {
        self.payouts.get(id).map(|p| p.clone())
    }

    pub fn pending(&self) -> Vec<Payout> {
        self.payouts
            .iter()
            .filter(|p| p.status == PayoutStatus::Pending)
            .map(|p| p.clone())
            .collect()
    }

    /// Resolve a user payout by crediting the ledger. Replay returns
    /// `AlreadyProcessed` and leaves the balance alone.
    pub fn complete_internal(&self, id: &str, ledger: &Ledger) -> EngineResult<Payout> {
        let mut entry = self
            .payouts
            .get_mut(id)
            .ok_or_else(|| EngineError::MemberNotFound(id.to_string()))?;
        if entry.status != PayoutStatus::Pending {
            return Err(EngineError::AlreadyProcessed(id.to_string()));
        }
        let user_id = entry
            .user_id
            .ok_or_else(|| EngineError::InvalidRequest("payout has no user account".to_string()))?;

        ledger.credit(user_id, entry.currency, entry.amount)?;
        entry.status = PayoutStatus::Completed;
        Ok(entry.clone())
    }

    /// Resolve an address payout after its transfer confirmed.
    pub fn complete_onchain(&self, id: &str, chain_tx_id: &str) -> EngineResult<Payout> {
        let mut entry = self
            .payouts
            .get_mut(id)
            .ok_or_else(|| EngineError::MemberNotFound(id.to_string()))?;
        if entry.status != PayoutStatus::Pending {
            return Err(EngineError::AlreadyProcessed(id.to_string()));
        }
        entry.status = PayoutStatus::Completed;
        entry.settlement_tx_id = Some(chain_tx_id.to_string());
        Ok(entry.clone())
    }
}

impl Default for PayoutBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_payout_completes_exactly_once() {
        let book = PayoutBook::new();
        let ledger = Ledger::new();
        let payout = book.create_for_user(4, Amount::from_units(19), Currency::Usd);

        book.complete_internal(&payout.id, &ledger).unwrap();
        assert_eq!(ledger.balance(4, Currency::Usd), Some(Amount::from_units(19)));

        let err = book.complete_internal(&payout.id, &ledger).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyProcessed(_)));
        assert_eq!(ledger.balance(4, Currency::Usd), Some(Amount::from_units(19)));
    }

    #[test]
    fn address_payout_records_transfer_id() {
        let book = PayoutBook::new();
        let payout = book.create_for_address("TDest", Amount::from_units(5), Currency::Trx);

        let done = book.complete_onchain(&payout.id, "sweep-9").unwrap();
        assert_eq!(done.settlement_tx_id.as_deref(), Some("sweep-9"));
        assert!(book.complete_onchain(&payout.id, "sweep-9").is_err());
    }
}
