//! Deposit sweep engine.
//!
//! Per chain, a watcher detects funds landing on custodial wallets,
//! consolidates them into the main pool (gas-priming the wallet first when
//! it cannot pay its own fees) and credits the owner's USD ledger balance.
//!
//! The ledger credit runs only after on-chain confirmation, as a replayable
//! "pending credit" keyed by transaction id: a conversion or ledger failure
//! keeps the credit queued for the next cycle, and the ledger's tx-id dedup
//! makes replays harmless. One wallet failing never aborts the batch.

use crate::chain::{ChainClient, Wallet, WalletRegistry};
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::exchange::RateGateway;
use crate::ledger::Ledger;
use crate::money::{Amount, Currency, UserId};
use crate::referral::ReferralEngine;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A confirmed sweep waiting for its ledger credit.
#[derive(Debug, Clone)]
struct PendingCredit {
    user_id: UserId,
    address: String,
    amount: Amount,
    currency: Currency,
    tx_id: String,
}

pub struct DepositSweeper {
    config: Arc<EngineConfig>,
    chain: Arc<dyn ChainClient>,
    ledger: Arc<Ledger>,
    gateway: Arc<RateGateway>,
    registry: WalletRegistry,
    referral: Arc<ReferralEngine>,
    /// Set for chains with cheap per-block transfer scans.
    block_scan: bool,
    last_scanned: Mutex<Option<u64>>,
    pending_credits: DashMap<String, PendingCredit>,
}

impl DepositSweeper {
    pub fn new(
        config: Arc<EngineConfig>,
        chain: Arc<dyn ChainClient>,
        ledger: Arc<Ledger>,
        gateway: Arc<RateGateway>,
        registry: WalletRegistry,
        referral: Arc<ReferralEngine>,
        block_scan: bool,
    ) -> Self {
        Self {
            config,
            chain,
            ledger,
            gateway,
            registry,
            referral,
            block_scan,
            last_scanned: Mutex::new(None),
            pending_credits: DashMap::new(),
        }
    }

    /// Walk blocks since the last scan and sweep wallets that received
    /// native deposits. Each block is visited once; anything missed here is
    /// recovered by the balance scan.
    pub async fn block_scan_cycle(&self) -> EngineResult<()> {
        let head = self.chain.current_block().await?;
        let from = {
            let last = self.last_scanned.lock().expect("scan cursor poisoned");
            last.map(|n| n + 1).unwrap_or(head.number)
        };

        let wallets = self.registry.wallets().await;
        for number in from..=head.number {
            let transfers = self.chain.transfers_in_block(number).await?;
            for transfer in transfers {
                let Some(wallet) = wallets.iter().find(|w| w.public_key == transfer.to) else {
                    continue;
                };
                if transfer.currency != self.chain.blockchain().native_currency() {
                    continue;
                }
                if transfer.amount < Amount::from_f64(self.config.sweep.min_native_sweep) {
                    debug!(
                        to = %transfer.to,
                        amount = %transfer.amount,
                        "deposit below sweep minimum, leaving on wallet"
                    );
                    continue;
                }
                info!(
                    chain = %self.chain.blockchain(),
                    to = %transfer.to,
                    amount = %transfer.amount,
                    "incoming deposit detected"
                );
                if let Err(err) = self.sweep_native(wallet, Some(&transfer.tx_id)).await {
                    warn!(address = %wallet.public_key, %err, "native sweep failed");
                }
            }
            *self.last_scanned.lock().expect("scan cursor poisoned") = Some(number);
        }

        self.drain_pending_credits().await;
        Ok(())
    }

    /// Scan every custodial wallet's balances and sweep anything above the
    /// minimums. Wallets are processed concurrently; failures are isolated.
    pub async fn balance_scan_cycle(&self) {
        let wallets = self.registry.wallets().await;
        let sweeps = wallets.iter().map(|wallet| async move {
            if let Err(err) = self.sweep_token(wallet).await {
                warn!(address = %wallet.public_key, %err, "token sweep failed");
            }
            if let Err(err) = self.sweep_native(wallet, None).await {
                warn!(address = %wallet.public_key, %err, "native sweep failed");
            }
        });
        futures::future::join_all(sweeps).await;

        self.drain_pending_credits().await;
    }

    /// Sweep the wallet's native balance, minus the fee reserve, into the
    /// main pool. The ledger credit is keyed by the incoming transaction id
    /// when the trigger was a block scan, otherwise by the sweep itself.
    async fn sweep_native(&self, wallet: &Wallet, incoming_tx: Option<&str>) -> EngineResult<()> {
        let balance = self.chain.native_balance(&wallet.public_key).await?;
        if balance < Amount::from_f64(self.config.sweep.min_native_sweep) {
            return Ok(());
        }
        let reserve = Amount::from_f64(self.config.sweep.native_fee_reserve);
        let to_send = balance - reserve;
        if !to_send.is_positive() {
            return Ok(());
        }

        let pool = self.chain.main_pool_address();
        let sweep_tx = self.chain.transfer_native(wallet, &pool, to_send).await?;
        self.chain
            .wait_for_confirmation(
                &sweep_tx,
                Duration::from_secs(self.config.sweep.confirm_timeout_secs),
            )
            .await?;

        let credit_key = incoming_tx.unwrap_or(&sweep_tx).to_string();
        info!(
            chain = %self.chain.blockchain(),
            from = %wallet.public_key,
            amount = %to_send,
            tx = %sweep_tx,
            "swept native balance to main pool"
        );
        self.enqueue_credit(PendingCredit {
            user_id: wallet.user_id,
            address: wallet.public_key.clone(),
            amount: to_send,
            currency: self.chain.blockchain().native_currency(),
            tx_id: credit_key,
        });
        Ok(())
    }

    /// Sweep the wallet's full token balance, gas-priming it first when its
    /// native balance cannot cover the transfer fee.
    async fn sweep_token(&self, wallet: &Wallet) -> EngineResult<()> {
        let balance = self.chain.token_balance(&wallet.public_key).await?;
        if balance < Amount::from_f64(self.config.sweep.min_token_sweep) {
            return Ok(());
        }

        let gas = self.chain.native_balance(&wallet.public_key).await?;
        if gas < Amount::from_f64(self.config.sweep.gas_floor) {
            let topup = Amount::from_f64(self.config.sweep.gas_topup);
            let gas_tx = self
                .chain
                .pool_transfer_native(&wallet.public_key, topup)
                .await?;
            self.chain
                .wait_for_confirmation(
                    &gas_tx,
                    Duration::from_secs(self.config.sweep.confirm_timeout_secs),
                )
                .await?;
            info!(address = %wallet.public_key, amount = %topup, "gas-primed wallet");
        }

        let pool = self.chain.main_pool_address();
        let sweep_tx = self.chain.transfer_token(wallet, &pool, balance).await?;
        self.chain
            .wait_for_confirmation(
                &sweep_tx,
                Duration::from_secs(self.config.sweep.confirm_timeout_secs),
            )
            .await?;

        info!(
            chain = %self.chain.blockchain(),
            from = %wallet.public_key,
            amount = %balance,
            tx = %sweep_tx,
            "swept token balance to main pool"
        );
        self.enqueue_credit(PendingCredit {
            user_id: wallet.user_id,
            address: wallet.public_key.clone(),
            amount: balance,
            currency: Currency::Usdt,
            tx_id: sweep_tx,
        });
        Ok(())
    }

    fn enqueue_credit(&self, credit: PendingCredit) {
        self.pending_credits.insert(credit.tx_id.clone(), credit);
    }

    /// Apply queued ledger credits. Each is retried until the conversion and
    /// the ledger write both succeed; a replay that already landed is
    /// dropped via the ledger's tx-id dedup.
    pub async fn drain_pending_credits(&self) {
        let queued: Vec<PendingCredit> =
            self.pending_credits.iter().map(|c| c.clone()).collect();

        for credit in queued {
            let usd = match self
                .gateway
                .convert(credit.amount, credit.currency, Currency::Usd)
                .await
            {
                Ok(usd) => usd,
                Err(err) => {
                    warn!(tx = %credit.tx_id, %err, "credit deferred, conversion unavailable");
                    continue;
                }
            };

            match self.ledger.apply_deposit(
                credit.user_id,
                &credit.address,
                credit.amount,
                credit.currency,
                usd,
                &credit.tx_id,
            ) {
                Ok(balance) => {
                    info!(
                        user_id = credit.user_id,
                        amount = %usd,
                        balance = %balance,
                        tx = %credit.tx_id,
                        "deposit credited"
                    );
                    self.pending_credits.remove(&credit.tx_id);
                    self.referral.on_deposit(
                        credit.user_id,
                        usd,
                        Currency::Usd,
                        self.ledger.deposit_count(credit.user_id),
                    );
                }
                Err(EngineError::DuplicateTransaction(_)) => {
                    debug!(tx = %credit.tx_id, "credit already applied, dropping replay");
                    self.pending_credits.remove(&credit.tx_id);
                }
                Err(err) => {
                    warn!(tx = %credit.tx_id, %err, "credit deferred, ledger rejected");
                }
            }
        }
    }

    pub fn pending_credit_count(&self) -> usize {
        self.pending_credits.len()
    }

    /// Spawn this chain's watcher loops.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.block_scan {
            let sweeper = Arc::clone(&self);
            let period = Duration::from_secs(self.config.sweep.block_poll_secs);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    if let Err(err) = sweeper.block_scan_cycle().await {
                        warn!(chain = %sweeper.chain.blockchain(), %err, "block scan failed");
                    }
                }
            }));
        }

        let sweeper = Arc::clone(&self);
        let period = Duration::from_secs(self.config.sweep.balance_scan_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                sweeper.balance_scan_cycle().await;
            }
        }));

        handles
    }
}
