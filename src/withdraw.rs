//! Withdrawal dispatcher.
//!
//! Small withdrawals pay out from the main pool on the spot; anything above
//! the instant limit is queued as a `WithdrawRequest` for operator review,
//! with the ledger debited at queue time. The instant path holds its debit
//! reversibly: a transfer failure refunds the debit instead of stranding it.

use crate::chain::ChainClient;
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::exchange::RateGateway;
use crate::ledger::Ledger;
use crate::money::{Amount, Blockchain, Currency, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawStatus {
    Pending,
    Completed,
}

/// A queued large withdrawal. The USD debit already happened; processing
/// performs the transfer and completes the request exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub id: String,
    pub user_id: UserId,
    pub to: String,
    pub currency: Currency,
    pub blockchain: Blockchain,
    pub amount_usd: Amount,
    pub status: WithdrawStatus,
    pub created_at: DateTime<Utc>,
    pub completed_tx: Option<String>,
}

/// What a withdrawal call produced.
#[derive(Debug, Clone)]
pub enum WithdrawOutcome {
    /// Paid on-chain immediately.
    Instant { tx_id: String, sent: Amount },
    /// Parked for operator processing.
    Queued(WithdrawRequest),
}

pub struct WithdrawalDispatcher {
    config: Arc<EngineConfig>,
    ledger: Arc<Ledger>,
    gateway: Arc<RateGateway>,
    chains: HashMap<Blockchain, Arc<dyn ChainClient>>,
    requests: DashMap<String, WithdrawRequest>,
    in_flight: DashMap<String, ()>,
}

impl WithdrawalDispatcher {
    pub fn new(
        config: Arc<EngineConfig>,
        ledger: Arc<Ledger>,
        gateway: Arc<RateGateway>,
        chains: HashMap<Blockchain, Arc<dyn ChainClient>>,
    ) -> Self {
        Self {
            config,
            ledger,
            gateway,
            chains,
            requests: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Withdraw `amount_usd` from a user's USD balance to an external
    /// address, denominated in `currency` on `blockchain`.
    pub async fn withdraw(
        &self,
        user_id: UserId,
        to: &str,
        currency: Currency,
        blockchain: Blockchain,
        amount_usd: Amount,
    ) -> EngineResult<WithdrawOutcome> {
        if !amount_usd.is_positive() {
            return Err(EngineError::InvalidAmount(amount_usd));
        }

        let instant_limit = Amount::from_f64(self.config.withdraw.instant_limit_usd);
        if amount_usd > instant_limit {
            // Debit up front; the request carries the obligation until an
            // operator processes it.
            self.ledger.debit(user_id, Currency::Usd, amount_usd)?;
            let request = WithdrawRequest {
                id: Uuid::new_v4().to_string(),
                user_id,
                to: to.to_string(),
                currency,
                blockchain,
                amount_usd,
                status: WithdrawStatus::Pending,
                created_at: Utc::now(),
                completed_tx: None,
            };
            self.requests.insert(request.id.clone(), request.clone());
            info!(
                user_id,
                amount = %amount_usd,
                request_id = %request.id,
                "withdrawal queued for review"
            );
            return Ok(WithdrawOutcome::Queued(request));
        }

        let chain = self.chain_for(blockchain)?;

        // Hold the debit while the transfer runs; refund it on any failure
        // so the ledger never stays debited without a completed transfer.
        self.ledger.debit(user_id, Currency::Usd, amount_usd)?;

        let result = self
            .transfer_out(chain.as_ref(), to, currency, amount_usd)
            .await;

        match result {
            Ok((tx_id, sent)) => {
                self.ledger
                    .record_withdrawal(user_id, to, sent, currency, &tx_id);
                info!(user_id, amount = %sent, %currency, tx = %tx_id, "instant withdrawal sent");
                Ok(WithdrawOutcome::Instant { tx_id, sent })
            }
            Err(err) => {
                warn!(user_id, %err, "instant withdrawal failed, refunding debit");
                self.ledger.credit(user_id, Currency::Usd, amount_usd)?;
                Err(err)
            }
        }
    }

    /// Operator path: execute a queued withdrawal. Completes at most once;
    /// a failed transfer leaves the request pending for another attempt.
    pub async fn process_withdraw(&self, request_id: &str) -> EngineResult<WithdrawRequest> {
        // Serialize concurrent processors of the same request.
        match self.in_flight.entry(request_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EngineError::AlreadyProcessed(request_id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let result = self.process_inner(request_id).await;
        self.in_flight.remove(request_id);
        result
    }

    async fn process_inner(&self, request_id: &str) -> EngineResult<WithdrawRequest> {
        let request = self
            .requests
            .get(request_id)
            .map(|r| r.clone())
            .ok_or_else(|| EngineError::MemberNotFound(request_id.to_string()))?;
        if request.status != WithdrawStatus::Pending {
            return Err(EngineError::AlreadyProcessed(request_id.to_string()));
        }

        let chain = self.chain_for(request.blockchain)?;
        let (tx_id, sent) = self
            .transfer_out(chain.as_ref(), &request.to, request.currency, request.amount_usd)
            .await?;

        self.ledger
            .record_withdrawal(request.user_id, &request.to, sent, request.currency, &tx_id);

        let mut entry = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| EngineError::MemberNotFound(request_id.to_string()))?;
        entry.status = WithdrawStatus::Completed;
        entry.completed_tx = Some(tx_id);
        info!(request_id, user_id = entry.user_id, amount = %sent, "queued withdrawal completed");
        Ok(entry.clone())
    }

    /// Convert USD to the payout currency and send it from the main pool.
    async fn transfer_out(
        &self,
        chain: &dyn ChainClient,
        to: &str,
        currency: Currency,
        amount_usd: Amount,
    ) -> EngineResult<(String, Amount)> {
        let sent = self.gateway.convert(amount_usd, Currency::Usd, currency).await?;
        if !sent.is_positive() {
            return Err(EngineError::InvalidAmount(sent));
        }

        let tx_id = if currency == chain.blockchain().native_currency() {
            chain.pool_transfer_native(to, sent).await?
        } else {
            chain.pool_transfer_token(to, sent).await?
        };
        Ok((tx_id, sent))
    }

    fn chain_for(&self, blockchain: Blockchain) -> EngineResult<Arc<dyn ChainClient>> {
        self.chains
            .get(&blockchain)
            .cloned()
            .ok_or_else(|| EngineError::ChainUnavailable(format!("{} not configured", blockchain)))
    }

    pub fn get_request(&self, request_id: &str) -> Option<WithdrawRequest> {
        self.requests.get(request_id).map(|r| r.clone())
    }

    pub fn pending_requests(&self) -> Vec<WithdrawRequest> {
        self.requests
            .iter()
            .filter(|r| r.status == WithdrawStatus::Pending)
            .map(|r| r.clone())
            .collect()
    }
}
