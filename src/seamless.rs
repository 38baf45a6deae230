//! Seamless operator wire protocol.
//!
//! Third-party game providers call in with signed batch requests that read
//! or mutate player balances. Every mutating request is verified against the
//! MD5 signing scheme before the ledger is touched, wager codes deduplicate
//! replays, and replies carry the numeric codes the provider contract
//! defines along with pre/post balances.

use crate::config::OperatorConfig;
use crate::errors::{EngineError, EngineResult};
use crate::ledger::Ledger;
use crate::money::{Amount, Currency, UserId};
use dashmap::DashMap;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Reply codes defined by the provider protocol.
pub mod codes {
    pub const OK: i32 = 0;
    pub const INVALID_SIGNATURE: i32 = -1;
    pub const MEMBER_NOT_FOUND: i32 = 1000;
    pub const INVALID_ACTION: i32 = 1001;
    pub const DUPLICATE_TRANSACTION: i32 = 1003;
    pub const BET_NOT_EXISTS: i32 = 1006;
}

/// `md5(operator_code + request_time + action + secret_key)`, lowercase hex.
pub fn sign(operator_code: &str, request_time: i64, action: &str, secret_key: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(operator_code.as_bytes());
    hasher.update(request_time.to_string().as_bytes());
    hasher.update(action.as_bytes());
    hasher.update(secret_key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_signature(
    operator_code: &str,
    request_time: i64,
    action: &str,
    secret_key: &str,
    provided: &str,
) -> bool {
    sign(operator_code, request_time, action, secret_key).eq_ignore_ascii_case(provided)
}

/// One wager mutation inside a batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerData {
    pub action: String,
    pub wager_code: String,
    #[serde(default)]
    pub wager_status: String,
    #[serde(default)]
    pub round_id: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub bet_amount: f64,
    #[serde(default)]
    pub prize_amount: f64,
    #[serde(default)]
    pub settled_at: Option<i64>,
    #[serde(default)]
    pub game_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRequest {
    pub member_account: String,
    #[serde(default)]
    pub product_code: i64,
    #[serde(default)]
    pub transactions: Vec<WagerData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub operator_code: String,
    pub request_time: i64,
    pub sign: String,
    pub currency: String,
    pub batch_requests: Vec<MemberRequest>,
}

/// A wager pushed with its owning member inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushWager {
    pub member_account: String,
    #[serde(default)]
    pub product_code: i64,
    pub currency: String,
    #[serde(flatten)]
    pub wager: WagerData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushBetRequest {
    pub operator_code: String,
    pub request_time: i64,
    pub sign: String,
    pub wagers: Vec<PushWager>,
}

/// Per-member reply with pre/post mutation balances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberReply {
    pub member_account: String,
    pub product_code: i64,
    pub before_balance: f64,
    pub balance: f64,
    pub code: i32,
    pub message: String,
}

impl MemberReply {
    fn failure(member: &MemberRequest, code: i32, message: &str) -> Self {
        Self {
            member_account: member.member_account.clone(),
            product_code: member.product_code,
            before_balance: 0.0,
            balance: 0.0,
            code,
            message: message.to_string(),
        }
    }
}

/// Wager row recorded alongside its balance mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerRecord {
    pub wager_code: String,
    pub user_id: UserId,
    pub action: String,
    pub wager_status: String,
    pub bet_amount: Amount,
    pub prize_amount: Amount,
    pub currency: Currency,
    pub game_code: Option<String>,
    pub settled_at: Option<i64>,
}

pub struct OperatorGateway {
    config: OperatorConfig,
    ledger: Arc<Ledger>,
    wagers: DashMap<String, WagerRecord>,
}

impl OperatorGateway {
    pub fn new(config: OperatorConfig, ledger: Arc<Ledger>) -> Self {
        Self {
            config,
            ledger,
            wagers: DashMap::new(),
        }
    }

    fn verify(&self, operator_code: &str, request_time: i64, action: &str, provided: &str) -> EngineResult<()> {
        if verify_signature(
            operator_code,
            request_time,
            action,
            &self.config.secret_key,
            provided,
        ) {
            Ok(())
        } else {
            Err(EngineError::InvalidSignature)
        }
    }

    fn parse_member(account: &str) -> Option<UserId> {
        account.parse().ok()
    }

    fn parse_currency(raw: &str) -> EngineResult<Currency> {
        raw.parse()
            .map_err(|_| EngineError::MemberNotFound(format!("unknown currency {}", raw)))
    }

    /// `balance` action: read-only batch balance lookup.
    pub fn process_balance(&self, request: &BatchRequest) -> EngineResult<Vec<MemberReply>> {
        self.verify(
            &request.operator_code,
            request.request_time,
            "getbalance",
            &request.sign,
        )?;
        let currency = Self::parse_currency(&request.currency)?;

        Ok(request
            .batch_requests
            .iter()
            .map(|member| {
                let Some(user_id) = Self::parse_member(&member.member_account) else {
                    return MemberReply::failure(member, codes::MEMBER_NOT_FOUND, "Member not Exist");
                };
                match self.ledger.balance(user_id, currency) {
                    Some(balance) => MemberReply {
                        member_account: member.member_account.clone(),
                        product_code: member.product_code,
                        before_balance: balance.to_f64(),
                        balance: balance.to_f64(),
                        code: codes::OK,
                        message: String::new(),
                    },
                    None => {
                        MemberReply::failure(member, codes::MEMBER_NOT_FOUND, "balance not found")
                    }
                }
            })
            .collect())
    }

    /// `withdraw` action: the provider takes a stake out of the player
    /// balance. Deduplicated by wager code; the debit and the wager record
    /// land together or not at all.
    pub fn process_withdraw(&self, request: &BatchRequest) -> EngineResult<Vec<MemberReply>> {
        self.verify(
            &request.operator_code,
            request.request_time,
            "withdraw",
            &request.sign,
        )?;
        let currency = Self::parse_currency(&request.currency)?;

        Ok(request
            .batch_requests
            .iter()
            .map(|member| self.withdraw_one(member, currency))
            .collect())
    }

    fn withdraw_one(&self, member: &MemberRequest, currency: Currency) -> MemberReply {
        let Some(user_id) = Self::parse_member(&member.member_account) else {
            return MemberReply::failure(member, codes::MEMBER_NOT_FOUND, "Member not Exist");
        };
        let Some(wager) = member.transactions.first() else {
            return MemberReply::failure(member, codes::INVALID_ACTION, "no transaction");
        };
        let Some(before) = self.ledger.balance(user_id, currency) else {
            return MemberReply::failure(member, codes::MEMBER_NOT_FOUND, "balance not found");
        };
        let stake = Amount::from_f64(wager.bet_amount);

        match self.wagers.entry(wager.wager_code.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => MemberReply {
                member_account: member.member_account.clone(),
                product_code: member.product_code,
                before_balance: before.to_f64(),
                balance: before.to_f64(),
                code: codes::DUPLICATE_TRANSACTION,
                message: "Duplicate Transaction".to_string(),
            },
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                match self.ledger.debit(user_id, currency, stake) {
                    Ok(balance) => {
                        slot.insert(WagerRecord {
                            wager_code: wager.wager_code.clone(),
                            user_id,
                            action: wager.action.clone(),
                            wager_status: wager.wager_status.clone(),
                            bet_amount: stake,
                            prize_amount: Amount::from_f64(wager.prize_amount),
                            currency,
                            game_code: wager.game_code.clone(),
                            settled_at: wager.settled_at,
                        });
                        MemberReply {
                            member_account: member.member_account.clone(),
                            product_code: member.product_code,
                            before_balance: before.to_f64(),
                            balance: balance.to_f64(),
                            code: codes::OK,
                            message: String::new(),
                        }
                    }
                    Err(err) => {
                        debug!(user_id, %err, "provider withdraw rejected");
                        MemberReply {
                            member_account: member.member_account.clone(),
                            product_code: member.product_code,
                            before_balance: before.to_f64(),
                            balance: before.to_f64(),
                            code: codes::INVALID_ACTION,
                            message: "Insufficient Balance".to_string(),
                        }
                    }
                }
            }
        }
    }

    /// `deposit` action: the provider settles winnings back onto the player
    /// balance. A CANCEL for an unknown wager is rejected, and repeating an
    /// action for the same wager is a duplicate.
    pub fn process_deposit(&self, request: &BatchRequest) -> EngineResult<Vec<MemberReply>> {
        self.verify(
            &request.operator_code,
            request.request_time,
            "deposit",
            &request.sign,
        )?;
        let currency = Self::parse_currency(&request.currency)?;

        Ok(request
            .batch_requests
            .iter()
            .map(|member| self.deposit_one(member, currency))
            .collect())
    }

    fn deposit_one(&self, member: &MemberRequest, currency: Currency) -> MemberReply {
        let Some(user_id) = Self::parse_member(&member.member_account) else {
            return MemberReply::failure(member, codes::MEMBER_NOT_FOUND, "Member not Exist");
        };
        let Some(wager) = member.transactions.first() else {
            return MemberReply::failure(member, codes::INVALID_ACTION, "no transaction");
        };
        let Some(before) = self.ledger.balance(user_id, currency) else {
            return MemberReply::failure(member, codes::MEMBER_NOT_FOUND, "balance not found");
        };

        let existing = self.wagers.get(&wager.wager_code).map(|w| w.clone());
        match &existing {
            None if wager.action == "CANCEL" => {
                return MemberReply {
                    member_account: member.member_account.clone(),
                    product_code: member.product_code,
                    before_balance: before.to_f64(),
                    balance: before.to_f64(),
                    code: codes::BET_NOT_EXISTS,
                    message: "Bet Not Exists".to_string(),
                };
            }
            Some(record) if record.action == wager.action => {
                return MemberReply {
                    member_account: member.member_account.clone(),
                    product_code: member.product_code,
                    before_balance: before.to_f64(),
                    balance: before.to_f64(),
                    code: codes::DUPLICATE_TRANSACTION,
                    message: "Duplicate Transaction".to_string(),
                };
            }
            _ => {}
        }

        let amount = Amount::from_f64(wager.amount);
        let balance = if amount.is_positive() {
            match self.ledger.credit(user_id, currency, amount) {
                Ok(balance) => balance,
                Err(err) => {
                    debug!(user_id, %err, "provider deposit rejected");
                    return MemberReply::failure(member, codes::INVALID_ACTION, "invalid amount");
                }
            }
        } else {
            before
        };

        self.upsert_wager(user_id, currency, wager);
        MemberReply {
            member_account: member.member_account.clone(),
            product_code: member.product_code,
            before_balance: before.to_f64(),
            balance: balance.to_f64(),
            code: codes::OK,
            message: String::new(),
        }
    }

    /// `pushbetdata` action: full wager lifecycle pushes. BET debits the
    /// stake, SETTLED with a prize credits it.
    pub fn process_push_bets(&self, request: &PushBetRequest) -> EngineResult<Vec<MemberReply>> {
        self.verify(
            &request.operator_code,
            request.request_time,
            "pushbetdata",
            &request.sign,
        )?;

        Ok(request
            .wagers
            .iter()
            .map(|push| self.push_one(push))
            .collect())
    }

    fn push_one(&self, push: &PushWager) -> MemberReply {
        let as_member = MemberRequest {
            member_account: push.member_account.clone(),
            product_code: push.product_code,
            transactions: vec![],
        };
        let Some(user_id) = Self::parse_member(&push.member_account) else {
            return MemberReply::failure(&as_member, codes::MEMBER_NOT_FOUND, "Member not Exist");
        };
        let Ok(currency) = Self::parse_currency(&push.currency) else {
            return MemberReply::failure(&as_member, codes::MEMBER_NOT_FOUND, "unknown currency");
        };
        let Some(before) = self.ledger.balance(user_id, currency) else {
            return MemberReply::failure(&as_member, codes::MEMBER_NOT_FOUND, "balance not found");
        };

        let mut balance = before;
        if push.wager.wager_status == "BET" {
            match self
                .ledger
                .debit(user_id, currency, Amount::from_f64(push.wager.bet_amount))
            {
                Ok(updated) => balance = updated,
                Err(_) => {
                    return MemberReply {
                        member_account: push.member_account.clone(),
                        product_code: push.product_code,
                        before_balance: before.to_f64(),
                        balance: before.to_f64(),
                        code: codes::INVALID_ACTION,
                        message: "Insufficient Balance".to_string(),
                    };
                }
            }
        }
        if push.wager.wager_status == "SETTLED" {
            let prize = Amount::from_f64(push.wager.prize_amount);
            if prize.is_positive() {
                if let Ok(updated) = self.ledger.credit(user_id, currency, prize) {
                    balance = updated;
                }
            }
        }

        self.upsert_wager(user_id, currency, &push.wager);
        MemberReply {
            member_account: push.member_account.clone(),
            product_code: push.product_code,
            before_balance: before.to_f64(),
            balance: balance.to_f64(),
            code: codes::OK,
            message: String::new(),
        }
    }

    fn upsert_wager(&self, user_id: UserId, currency: Currency, wager: &WagerData) {
        match self.wagers.entry(wager.wager_code.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                record.action = wager.action.clone();
                record.wager_status = wager.wager_status.clone();
                record.prize_amount = Amount::from_f64(wager.prize_amount);
                record.settled_at = wager.settled_at;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(WagerRecord {
                    wager_code: wager.wager_code.clone(),
                    user_id,
                    action: wager.action.clone(),
                    wager_status: wager.wager_status.clone(),
                    bet_amount: Amount::from_f64(wager.bet_amount),
                    prize_amount: Amount::from_f64(wager.prize_amount),
                    currency,
                    game_code: wager.game_code.clone(),
                    settled_at: wager.settled_at,
                });
            }
        }
    }

    pub fn wager(&self, wager_code: &str) -> Option<WagerRecord> {
        self.wagers.get(wager_code).map(|w| w.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "s3cret";

    fn gateway() -> (OperatorGateway, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::new());
        let config = OperatorConfig {
            operator_code: "op01".to_string(),
            secret_key: SECRET.to_string(),
        };
        (OperatorGateway::new(config, ledger.clone()), ledger)
    }

    fn batch(action: &str, currency: &str, members: Vec<MemberRequest>) -> BatchRequest {
        BatchRequest {
            operator_code: "op01".to_string(),
            request_time: 1_700_000_000,
            sign: sign("op01", 1_700_000_000, action, SECRET),
            currency: currency.to_string(),
            batch_requests: members,
        }
    }

    fn wager(code: &str, action: &str, bet: f64, amount: f64) -> WagerData {
        WagerData {
            action: action.to_string(),
            wager_code: code.to_string(),
            wager_status: "BET".to_string(),
            round_id: None,
            amount,
            bet_amount: bet,
            prize_amount: 0.0,
            settled_at: None,
            game_code: None,
        }
    }

    #[test]
    fn signature_round_trips_case_insensitively() {
        let s = sign("op01", 42, "getbalance", SECRET);
        assert!(verify_signature("op01", 42, "getbalance", SECRET, &s));
        assert!(verify_signature("op01", 42, "getbalance", SECRET, &s.to_uppercase()));
        assert!(!verify_signature("op01", 42, "getbalance", "wrong", &s));
        assert!(!verify_signature("op01", 43, "getbalance", SECRET, &s));
    }

    #[test]
    fn bad_signature_rejects_the_whole_batch() {
        let (gw, _) = gateway();
        let mut request = batch("getbalance", "USD", vec![]);
        request.sign = "deadbeef".to_string();
        assert!(matches!(
            gw.process_balance(&request),
            Err(EngineError::InvalidSignature)
        ));
    }

    #[test]
    fn balance_lookup_reports_member_codes() {
        let (gw, ledger) = gateway();
        ledger.credit(7, Currency::Usd, Amount::from_units(42)).unwrap();

        let request = batch(
            "getbalance",
            "USD",
            vec![
                MemberRequest {
                    member_account: "7".to_string(),
                    product_code: 1020,
                    transactions: vec![],
                },
                MemberRequest {
                    member_account: "ghost".to_string(),
                    product_code: 1020,
                    transactions: vec![],
                },
            ],
        );
        let replies = gw.process_balance(&request).unwrap();
        assert_eq!(replies[0].code, codes::OK);
        assert_eq!(replies[0].balance, 42.0);
        assert_eq!(replies[1].code, codes::MEMBER_NOT_FOUND);
    }

    #[test]
    fn provider_withdraw_debits_once_per_wager_code() {
        let (gw, ledger) = gateway();
        ledger.credit(7, Currency::Usd, Amount::from_units(100)).unwrap();

        let member = MemberRequest {
            member_account: "7".to_string(),
            product_code: 1020,
            transactions: vec![wager("w-1", "BET", 30.0, 30.0)],
        };
        let request = batch("withdraw", "USD", vec![member]);

        let first = gw.process_withdraw(&request).unwrap();
        assert_eq!(first[0].code, codes::OK);
        assert_eq!(first[0].before_balance, 100.0);
        assert_eq!(first[0].balance, 70.0);

        let replay = gw.process_withdraw(&request).unwrap();
        assert_eq!(replay[0].code, codes::DUPLICATE_TRANSACTION);
        assert_eq!(ledger.balance(7, Currency::Usd), Some(Amount::from_units(70)));
    }

    #[test]
    fn provider_withdraw_rejects_overdraft() {
        let (gw, ledger) = gateway();
        ledger.credit(7, Currency::Usd, Amount::from_units(10)).unwrap();

        let member = MemberRequest {
            member_account: "7".to_string(),
            product_code: 1020,
            transactions: vec![wager("w-2", "BET", 30.0, 30.0)],
        };
        let replies = gw.process_withdraw(&batch("withdraw", "USD", vec![member])).unwrap();
        assert_eq!(replies[0].code, codes::INVALID_ACTION);
        assert_eq!(ledger.balance(7, Currency::Usd), Some(Amount::from_units(10)));
        // The rejected wager is not recorded, so a retry can succeed.
        assert!(gw.wager("w-2").is_none());
    }

    #[test]
    fn provider_deposit_settles_and_detects_replays() {
        let (gw, ledger) = gateway();
        ledger.credit(7, Currency::Usd, Amount::from_units(70)).unwrap();

        // Stake taken under wager w-3 first.
        let member = MemberRequest {
            member_account: "7".to_string(),
            product_code: 1020,
            transactions: vec![wager("w-3", "BET", 20.0, 20.0)],
        };
        gw.process_withdraw(&batch("withdraw", "USD", vec![member])).unwrap();

        let settle = MemberRequest {
            member_account: "7".to_string(),
            product_code: 1020,
            transactions: vec![wager("w-3", "SETTLED", 20.0, 35.0)],
        };
        let replies = gw
            .process_deposit(&batch("deposit", "USD", vec![settle.clone()]))
            .unwrap();
        assert_eq!(replies[0].code, codes::OK);
        assert_eq!(replies[0].balance, 85.0);

        // Same action replayed: duplicate, no double credit.
        let replay = gw.process_deposit(&batch("deposit", "USD", vec![settle])).unwrap();
        assert_eq!(replay[0].code, codes::DUPLICATE_TRANSACTION);
        assert_eq!(ledger.balance(7, Currency::Usd), Some(Amount::from_units(85)));
    }

    #[test]
    fn cancel_of_unknown_wager_is_rejected() {
        let (gw, ledger) = gateway();
        ledger.credit(7, Currency::Usd, Amount::from_units(50)).unwrap();

        let cancel = MemberRequest {
            member_account: "7".to_string(),
            product_code: 1020,
            transactions: vec![wager("w-404", "CANCEL", 0.0, 10.0)],
        };
        let replies = gw.process_deposit(&batch("deposit", "USD", vec![cancel])).unwrap();
        assert_eq!(replies[0].code, codes::BET_NOT_EXISTS);
        assert_eq!(ledger.balance(7, Currency::Usd), Some(Amount::from_units(50)));
    }

    #[test]
    fn push_bets_follow_the_wager_lifecycle() {
        let (gw, ledger) = gateway();
        ledger.credit(7, Currency::Usd, Amount::from_units(100)).unwrap();

        let push = |status: &str, bet: f64, prize: f64| PushBetRequest {
            operator_code: "op01".to_string(),
            request_time: 9,
            sign: sign("op01", 9, "pushbetdata", SECRET),
            wagers: vec![PushWager {
                member_account: "7".to_string(),
                product_code: 1020,
                currency: "USD".to_string(),
                wager: WagerData {
                    action: "PUSH".to_string(),
                    wager_code: "p-1".to_string(),
                    wager_status: status.to_string(),
                    round_id: None,
                    amount: bet,
                    bet_amount: bet,
                    prize_amount: prize,
                    settled_at: None,
                    game_code: Some("slot-7".to_string()),
                },
            }],
        };

        let bet_reply = gw.process_push_bets(&push("BET", 25.0, 0.0)).unwrap();
        assert_eq!(bet_reply[0].balance, 75.0);

        let settle_reply = gw.process_push_bets(&push("SETTLED", 25.0, 60.0)).unwrap();
        assert_eq!(settle_reply[0].balance, 135.0);
        assert_eq!(gw.wager("p-1").unwrap().wager_status, "SETTLED");
    }
}
