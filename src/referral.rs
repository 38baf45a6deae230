//! Referral bonus accrual.
//!
//! Signup, deposit and bet events accrue bonuses to the referrer, bounded by
//! a per-user cap and an expiry window. Open pending rows for the same
//! (beneficiary, source, currency, trigger) tuple are incremented rather
//! than duplicated. Conversion to a payout reserves the full requested
//! amount across rows before mutating anything: a shortfall leaves every row
//! untouched.

use crate::config::ReferralConfig;
use crate::errors::{EngineError, EngineResult};
use crate::money::{Amount, Currency, UserId};
use crate::payout::{Payout, PayoutBook};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Signup,
    Deposit,
    Bet,
    FirstDeposit,
    FirstBet,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerType::Signup => "signup",
            TriggerType::Deposit => "deposit",
            TriggerType::Bet => "bet",
            TriggerType::FirstDeposit => "first_deposit",
            TriggerType::FirstBet => "first_bet",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BonusStatus {
    Pending,
    Paid,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralBonus {
    pub id: u64,
    /// Beneficiary: the referrer the bonus accrues to.
    pub user_id: UserId,
    /// The referred user whose activity triggered it.
    pub from_user_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
    pub status: BonusStatus,
    pub trigger: TriggerType,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

struct BonusTable {
    rows: Vec<ReferralBonus>,
    next_id: u64,
}

pub struct ReferralEngine {
    config: RwLock<ReferralConfig>,
    referrers: DashMap<UserId, UserId>,
    referred: DashMap<UserId, Vec<UserId>>,
    bonuses: Mutex<BonusTable>,
    payouts: Arc<PayoutBook>,
}

impl ReferralEngine {
    pub fn new(config: ReferralConfig, payouts: Arc<PayoutBook>) -> Self {
        Self {
            config: RwLock::new(config),
            referrers: DashMap::new(),
            referred: DashMap::new(),
            bonuses: Mutex::new(BonusTable {
                rows: Vec::new(),
                next_id: 1,
            }),
            payouts,
        }
    }

    pub fn config(&self) -> ReferralConfig {
        self.config.read().expect("referral config poisoned").clone()
    }

    /// Tune the singleton config in place.
    pub fn update_config<F: FnOnce(&mut ReferralConfig)>(&self, mutate: F) {
        let mut config = self.config.write().expect("referral config poisoned");
        mutate(&mut config);
    }

    /// Attach a referrer to a user. Write-once, no self-referral.
    pub fn link(&self, user_id: UserId, referrer: UserId) -> EngineResult<()> {
        if user_id == referrer {
            return Err(EngineError::InvalidRequest(
                "self-referral is not allowed".to_string(),
            ));
        }
        match self.referrers.entry(user_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::AlreadyProcessed(
                format!("user {} already has a referrer", user_id),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(referrer);
                self.referred.entry(referrer).or_default().push(user_id);
                Ok(())
            }
        }
    }

    pub fn referrer_of(&self, user_id: UserId) -> Option<UserId> {
        self.referrers.get(&user_id).map(|r| *r)
    }

    /// Size of a user's downline: everyone reachable through referral links.
    /// Iterative traversal with a visited set, so a malformed cyclic graph
    /// terminates instead of recursing forever.
    pub fn team_size(&self, user_id: UserId) -> usize {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([user_id]);
        visited.insert(user_id);
        let mut count = 0;

        while let Some(current) = queue.pop_front() {
            if let Some(children) = self.referred.get(&current) {
                for &child in children.iter() {
                    if visited.insert(child) {
                        count += 1;
                        queue.push_back(child);
                    }
                }
            }
        }
        count
    }

    pub fn on_signup(&self, user_id: UserId) -> Option<ReferralBonus> {
        let flat = Amount::from_f64(self.config().signup_bonus);
        self.try_accrue(user_id, flat, Currency::Usd, TriggerType::Signup)
    }

    /// Deposit trigger. `deposit_count` is the user's total credited
    /// deposits including this one; the first also pays the flat bonus.
    pub fn on_deposit(
        &self,
        user_id: UserId,
        amount: Amount,
        currency: Currency,
        deposit_count: u64,
    ) {
        let config = self.config();
        let percent_cut = amount
            .mul_ratio(config.deposit_bonus_percent, 100)
            .floor_units();
        self.try_accrue(user_id, percent_cut, currency, TriggerType::Deposit);

        if deposit_count == 1 {
            let flat = Amount::from_f64(config.first_deposit_bonus);
            self.try_accrue(user_id, flat, currency, TriggerType::FirstDeposit);
        }
    }

    /// Bet trigger. `bet_count` includes the bet just placed.
    pub fn on_bet(&self, user_id: UserId, amount: Amount, currency: Currency, bet_count: u64) {
        let config = self.config();
        let percent_cut = amount
            .mul_ratio(config.bet_bonus_percent, 100)
            .floor_units();
        self.try_accrue(user_id, percent_cut, currency, TriggerType::Bet);

        if bet_count == 1 {
            let flat = Amount::from_f64(config.first_bet_bonus);
            self.try_accrue(user_id, flat, currency, TriggerType::FirstBet);
        }
    }

    /// Accrue without failing the triggering operation. Cap hits and missing
    /// referrers are a skip, not an error.
    fn try_accrue(
        &self,
        source_user: UserId,
        amount: Amount,
        currency: Currency,
        trigger: TriggerType,
    ) -> Option<ReferralBonus> {
        match self.accrue(source_user, amount, currency, trigger) {
            Ok(bonus) => bonus,
            Err(EngineError::BonusCapExceeded { user_id }) => {
                debug!(user_id, %trigger, "bonus cap reached, skipping accrual");
                None
            }
            Err(err) => {
                warn!(%err, source_user, %trigger, "referral accrual failed");
                None
            }
        }
    }

    /// Accrue a bonus to `source_user`'s referrer.
    pub fn accrue(
        &self,
        source_user: UserId,
        amount: Amount,
        currency: Currency,
        trigger: TriggerType,
    ) -> EngineResult<Option<ReferralBonus>> {
        let config = self.config();
        if !config.enabled || !amount.is_positive() {
            return Ok(None);
        }
        let Some(beneficiary) = self.referrer_of(source_user) else {
            return Ok(None);
        };

        let cap = Amount::from_f64(config.max_bonus_per_user);
        let expires_at = Utc::now() + ChronoDuration::days(config.bonus_expiry_days);

        let mut table = self.bonuses.lock().expect("bonus table poisoned");

        let rolling: Amount = table
            .rows
            .iter()
            .filter(|b| {
                b.user_id == beneficiary
                    && b.currency == currency
                    && b.status != BonusStatus::Expired
            })
            .map(|b| b.amount)
            .sum();
        if rolling + amount > cap {
            return Err(EngineError::BonusCapExceeded {
                user_id: beneficiary,
            });
        }

        if let Some(open) = table.rows.iter_mut().find(|b| {
            b.user_id == beneficiary
                && b.from_user_id == source_user
                && b.currency == currency
                && b.trigger == trigger
                && b.status == BonusStatus::Pending
        }) {
            open.amount += amount;
            open.expires_at = expires_at;
            return Ok(Some(open.clone()));
        }

        let id = table.next_id;
        table.next_id += 1;
        let bonus = ReferralBonus {
            id,
            user_id: beneficiary,
            from_user_id: source_user,
            amount,
            currency,
            status: BonusStatus::Pending,
            trigger,
            created_at: Utc::now(),
            expires_at,
        };
        table.rows.push(bonus.clone());
        Ok(Some(bonus))
    }

    /// Flip pending bonuses past their expiry to expired. Returns how many.
    pub fn expire_old(&self) -> usize {
        let now = Utc::now();
        let mut table = self.bonuses.lock().expect("bonus table poisoned");
        let mut expired = 0;
        for bonus in table.rows.iter_mut() {
            if bonus.status == BonusStatus::Pending && bonus.expires_at < now {
                bonus.status = BonusStatus::Expired;
                expired += 1;
            }
        }
        expired
    }

    /// Hourly expiry sweep.
    pub fn spawn_expiry_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.config().expiry_sweep_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let expired = self.expire_old();
                if expired > 0 {
                    info!(expired, "expired referral bonuses");
                }
            }
        })
    }

    /// Convert pending bonuses into one pending payout, consuming rows
    /// oldest first and shrinking the last one touched. All-or-nothing: the
    /// plan is computed before any row changes, so an uncoverable request
    /// mutates nothing.
    pub fn convert_to_payout(
        &self,
        user_id: UserId,
        amount: Amount,
        currency: Currency,
    ) -> EngineResult<Payout> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount(amount));
        }
        let now = Utc::now();
        let mut table = self.bonuses.lock().expect("bonus table poisoned");

        let mut order: Vec<usize> = table
            .rows
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                b.user_id == user_id
                    && b.currency == currency
                    && b.status == BonusStatus::Pending
                    && b.expires_at > now
            })
            .map(|(i, _)| i)
            .collect();
        order.sort_by_key(|&i| table.rows[i].created_at);

        let mut plan: Vec<(usize, Amount)> = Vec::new();
        let mut remaining = amount;
        for &i in &order {
            if remaining.is_zero() {
                break;
            }
            let take = table.rows[i].amount.min(remaining);
            plan.push((i, take));
            remaining = remaining - take;
        }

        if remaining.is_positive() {
            let covered = amount - remaining;
            return Err(EngineError::InsufficientBalance {
                currency,
                needed: amount,
                available: covered,
            });
        }

        for (i, take) in plan {
            let row = &mut table.rows[i];
            if take == row.amount {
                row.status = BonusStatus::Paid;
            } else {
                row.amount = row.amount - take;
            }
        }
        drop(table);

        Ok(self.payouts.create_for_user(user_id, amount, currency))
    }

    pub fn bonuses_for(&self, user_id: UserId) -> Vec<ReferralBonus> {
        self.bonuses
            .lock()
            .expect("bonus table poisoned")
            .rows
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect()
    }
}
