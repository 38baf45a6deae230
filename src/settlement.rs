//! Bet settlement state machine.
//!
//! Lifecycle: a bet is created `pending` and transitions to `win` or `lose`
//! exactly once. Balance-funded bets have their stake debited at placement;
//! settlement only ever credits. The terminal transition is claimed under
//! the bet-table entry lock, so overlapping sweep ticks cannot double-pay,
//! and a tick that fails to read the chain leaves the bet pending for the
//! next one.

use crate::chain::{BlockRef, ChainClient};
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::games::{self, BatchType, Bet, BetOrigin, BetStatus, GameKind, SeedSource};
use crate::ledger::Ledger;
use crate::money::{Amount, Currency, UserId};
use crate::payout::PayoutBook;
use crate::referral::ReferralEngine;
use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Audit digest binding a settlement to the block hash that produced it.
pub fn settlement_receipt(bet_id: &str, block_hash: &str, result: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bet_id.as_bytes());
    hasher.update(b":");
    hasher.update(block_hash.as_bytes());
    hasher.update(b":");
    hasher.update(result.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct SettlementEngine {
    config: Arc<EngineConfig>,
    chain: Arc<dyn ChainClient>,
    ledger: Arc<Ledger>,
    payouts: Arc<PayoutBook>,
    referral: Arc<ReferralEngine>,
    bets: DashMap<String, Bet>,
    bet_counts: DashMap<UserId, u64>,
}

impl SettlementEngine {
    pub fn new(
        config: Arc<EngineConfig>,
        chain: Arc<dyn ChainClient>,
        ledger: Arc<Ledger>,
        payouts: Arc<PayoutBook>,
        referral: Arc<ReferralEngine>,
    ) -> Self {
        Self {
            config,
            chain,
            ledger,
            payouts,
            referral,
            bets: DashMap::new(),
            bet_counts: DashMap::new(),
        }
    }

    fn check_limits(&self, amount: Amount, currency: Currency) -> EngineResult<()> {
        let (min, max) = self
            .config
            .games
            .bet_limits(currency)
            .ok_or_else(|| EngineError::BetRejected(format!("{} is not a wager currency", currency)))?;
        if amount < min {
            return Err(EngineError::BetRejected(format!(
                "stake {} below minimum {}",
                amount, min
            )));
        }
        if amount > max {
            return Err(EngineError::BetRejected(format!(
                "stake {} above maximum {}",
                amount, max
            )));
        }
        Ok(())
    }

    /// Place a bet funded by an on-chain transfer to a house address.
    /// Batch bets stay pending until their sweep; instant bets settle here.
    pub async fn place_address_bet(
        &self,
        player: &str,
        game: GameKind,
        batch: BatchType,
        amount: Amount,
        currency: Currency,
        block_num: u64,
        tx_hash: Option<String>,
    ) -> EngineResult<Bet> {
        self.check_limits(amount, currency)?;

        let bet = self.insert_bet(
            BetOrigin::Address(player.to_string()),
            game,
            batch,
            amount,
            currency,
            block_num,
            tx_hash,
        );
        info!(bet_id = %bet.id, %game, player, %amount, %currency, "bet stored");

        if batch == BatchType::Instant {
            self.settle_instant(&bet.id).await;
        }
        Ok(self.bets.get(&bet.id).map(|b| b.clone()).unwrap_or(bet))
    }

    /// Place a bet funded from a user's balance. The stake is debited here;
    /// settlement will only credit back on a win.
    pub async fn place_balance_bet(
        &self,
        user_id: UserId,
        game: GameKind,
        amount: Amount,
        currency: Currency,
    ) -> EngineResult<Bet> {
        self.check_limits(amount, currency)?;

        let current = self.chain.current_block().await?;
        self.ledger.debit(user_id, currency, amount)?;

        let bet = self.insert_bet(
            BetOrigin::User(user_id),
            game,
            BatchType::Instant,
            amount,
            currency,
            current.number,
            None,
        );

        let bet_count = {
            let mut count = self.bet_counts.entry(user_id).or_insert(0);
            *count += 1;
            *count
        };
        // Accrual problems never unwind a placed bet.
        self.referral.on_bet(user_id, amount, currency, bet_count);

        self.settle_instant(&bet.id).await;
        Ok(self.bets.get(&bet.id).map(|b| b.clone()).unwrap_or(bet))
    }

    fn insert_bet(
        &self,
        origin: BetOrigin,
        game: GameKind,
        batch: BatchType,
        amount: Amount,
        currency: Currency,
        block_num: u64,
        tx_hash: Option<String>,
    ) -> Bet {
        let bet = Bet {
            id: Uuid::new_v4().to_string(),
            origin,
            game,
            amount,
            currency,
            direction: games::direction_for(game, amount),
            block_num,
            batch,
            status: BetStatus::Pending,
            payout: Amount::ZERO,
            result: String::new(),
            receipt: None,
            tx_hash,
            created_at: Utc::now(),
        };
        self.bets.insert(bet.id.clone(), bet.clone());
        bet
    }

    async fn settle_instant(&self, bet_id: &str) {
        if let Err(err) = self.settle_bet(bet_id).await {
            // Stays pending; the one-minute sweep picks it up.
            warn!(bet_id, %err, "instant settlement deferred");
        }
    }

    /// Settle one bet against the chain. A no-op when already terminal.
    pub async fn settle_bet(&self, bet_id: &str) -> EngineResult<Option<Bet>> {
        let current = self.chain.current_block().await?;
        self.settle_with(bet_id, &current).await
    }

    async fn settle_with(&self, bet_id: &str, current: &BlockRef) -> EngineResult<Option<Bet>> {
        let bet = match self.bets.get(bet_id) {
            Some(b) => b.clone(),
            None => return Err(EngineError::MemberNotFound(bet_id.to_string())),
        };
        if bet.status != BetStatus::Pending {
            return Ok(None);
        }

        let seed_hash = match games::seed_source(bet.game) {
            SeedSource::CurrentBlock => current.hash.clone(),
            SeedSource::CapturedBlock if bet.block_num == current.number => current.hash.clone(),
            SeedSource::CapturedBlock => self.chain.block_hash(bet.block_num).await?,
        };

        let outcome = games::resolve(bet.game, bet.amount, &seed_hash, &self.config.games)?;
        let receipt = settlement_receipt(&bet.id, &seed_hash, &outcome.result);

        // Claim the terminal transition under the entry lock. A concurrent
        // tick that settled while we were reading the chain loses the race
        // here and this becomes a no-op.
        let claimed = {
            let mut entry = match self.bets.get_mut(bet_id) {
                Some(e) => e,
                None => return Err(EngineError::MemberNotFound(bet_id.to_string())),
            };
            if entry.status != BetStatus::Pending {
                false
            } else {
                entry.status = outcome.status;
                entry.payout = outcome.payout;
                entry.result = outcome.result.clone();
                entry.receipt = Some(receipt);
                true
            }
        };
        if !claimed {
            return Ok(None);
        }

        if outcome.status == BetStatus::Win && outcome.payout.is_positive() {
            match &bet.origin {
                BetOrigin::User(user_id) => {
                    self.ledger.credit(*user_id, bet.currency, outcome.payout)?;
                }
                BetOrigin::Address(address) => {
                    self.payouts
                        .create_for_address(address, outcome.payout, bet.currency);
                }
            }
        }

        let settled = self.bets.get(bet_id).map(|b| b.clone());
        if let Some(ref b) = settled {
            info!(
                bet_id,
                game = %b.game,
                status = ?b.status,
                payout = %b.payout,
                "bet settled"
            );
        }
        Ok(settled)
    }

    /// One sweep tick: settle every pending bet in the given batch classes.
    /// A chain read failure skips the whole tick; per-bet failures skip that
    /// bet. Both retry on the next tick, and re-processing an already
    /// settled bet is a no-op.
    pub async fn settle_due(&self, batches: &[BatchType]) -> usize {
        let current = match self.chain.current_block().await {
            Ok(block) => block,
            Err(err) => {
                warn!(%err, "sweep tick skipped, chain unreachable");
                return 0;
            }
        };

        let due: Vec<String> = self
            .bets
            .iter()
            .filter(|b| b.status == BetStatus::Pending && batches.contains(&b.batch))
            .map(|b| b.id.clone())
            .collect();

        let mut settled = 0;
        for bet_id in due {
            match self.settle_with(&bet_id, &current).await {
                Ok(Some(_)) => settled += 1,
                Ok(None) => {}
                Err(err) => {
                    warn!(bet_id = %bet_id, %err, "bet left pending for next sweep");
                }
            }
        }
        debug!(settled, "sweep tick complete");
        settled
    }

    /// Spawn the periodic batch sweeps. The one-minute tick also retries
    /// instant bets whose placement-time settlement was deferred.
    pub fn spawn_batch_sweeps(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let engine = Arc::clone(&self);
        let period = Duration::from_secs(self.config.games.one_minute_interval_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                engine
                    .settle_due(&[BatchType::OneMinute, BatchType::Instant])
                    .await;
            }
        }));

        let period = Duration::from_secs(self.config.games.three_minute_interval_secs);
        let engine = self;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                engine.settle_due(&[BatchType::ThreeMinute]).await;
            }
        }));

        handles
    }

    pub fn get_bet(&self, bet_id: &str) -> Option<Bet> {
        self.bets.get(bet_id).map(|b| b.clone())
    }

    /// A user's bets, newest first.
    pub fn bets_for_user(&self, user_id: UserId, limit: usize, offset: usize) -> Vec<Bet> {
        let mut bets: Vec<Bet> = self
            .bets
            .iter()
            .filter(|b| b.origin.user_id() == Some(user_id))
            .map(|b| b.clone())
            .collect();
        bets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bets.into_iter().skip(offset).take(limit).collect()
    }

    pub fn bet_count(&self, user_id: UserId) -> u64 {
        self.bet_counts.get(&user_id).map(|c| *c).unwrap_or(0)
    }
}
