//! Configuration for the settlement engine.
//!
//! Centralized configuration with defaults, TOML file loading, environment
//! variable overrides and validation. Components receive an immutable
//! `Arc<EngineConfig>` at construction; nothing reads ambient globals.

use crate::errors::{EngineError, EngineResult};
use crate::money::{Amount, Currency};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub games: GamesConfig,
    pub sweep: SweepConfig,
    pub withdraw: WithdrawConfig,
    pub exchange: ExchangeConfig,
    pub referral: ReferralConfig,
    pub operator: OperatorConfig,
}

/// Odds, fees, bet limits and batch cadence for the hash games.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GamesConfig {
    /// Win odds for big/small and odd/even, as a ratio.
    pub odds_numerator: u32,
    pub odds_denominator: u32,
    /// Platform fee applied to winnings, as a ratio.
    pub fee_numerator: u32,
    pub fee_denominator: u32,
    pub trx_min_bet: f64,
    pub trx_max_bet: f64,
    pub usdt_min_bet: f64,
    pub usdt_max_bet: f64,
    /// Sweep cadence for the two batch settlement classes.
    pub one_minute_interval_secs: u64,
    pub three_minute_interval_secs: u64,
}

impl Default for GamesConfig {
    fn default() -> Self {
        Self {
            odds_numerator: 195,
            odds_denominator: 100,
            fee_numerator: 1,
            fee_denominator: 100,
            trx_min_bet: 10.0,
            trx_max_bet: 10_000.0,
            usdt_min_bet: 1.0,
            usdt_max_bet: 2_000.0,
            one_minute_interval_secs: 60,
            three_minute_interval_secs: 180,
        }
    }
}

impl GamesConfig {
    /// Intake limits for a wager currency, or `None` when the currency is
    /// not accepted for hash games.
    pub fn bet_limits(&self, currency: Currency) -> Option<(Amount, Amount)> {
        match currency {
            Currency::Trx => Some((
                Amount::from_f64(self.trx_min_bet),
                Amount::from_f64(self.trx_max_bet),
            )),
            Currency::Usdt | Currency::Usd => Some((
                Amount::from_f64(self.usdt_min_bet),
                Amount::from_f64(self.usdt_max_bet),
            )),
            _ => None,
        }
    }
}

/// Deposit sweep tuning, shared by all chain watchers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Minimum token balance worth sweeping.
    pub min_token_sweep: f64,
    /// Minimum native-coin deposit worth sweeping.
    pub min_native_sweep: f64,
    /// Native amount sent to a wallet that cannot pay sweep gas.
    pub gas_topup: f64,
    /// Native balance below which a wallet is gas-primed before a token sweep.
    pub gas_floor: f64,
    /// Reserve left behind on native sweeps to cover the transfer fee.
    pub native_fee_reserve: f64,
    pub block_poll_secs: u64,
    pub balance_scan_secs: u64,
    pub wallet_refresh_secs: u64,
    pub confirm_timeout_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            min_token_sweep: 10.0,
            min_native_sweep: 5.0,
            gas_topup: 2.0,
            gas_floor: 2.0,
            native_fee_reserve: 0.1,
            block_poll_secs: 3,
            balance_scan_secs: 60,
            wallet_refresh_secs: 10,
            confirm_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WithdrawConfig {
    /// USD amounts above this are queued for manual processing instead of
    /// paid out on the spot.
    pub instant_limit_usd: f64,
}

impl Default for WithdrawConfig {
    fn default() -> Self {
        Self {
            instant_limit_usd: 200.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Spot prices older than this are refetched. Bounded by validation to
    /// keep stale-rate exposure under a minute.
    pub rate_ttl_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self { rate_ttl_secs: 30 }
    }
}

/// Referral program tuning. Flat bonuses are USD-denominated; percentages
/// apply to the triggering deposit/bet amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    pub enabled: bool,
    pub deposit_bonus_percent: u32,
    pub bet_bonus_percent: u32,
    pub first_deposit_bonus: f64,
    pub first_bet_bonus: f64,
    pub signup_bonus: f64,
    pub max_bonus_per_user: f64,
    pub bonus_expiry_days: i64,
    pub expiry_sweep_secs: u64,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deposit_bonus_percent: 5,
            bet_bonus_percent: 2,
            first_deposit_bonus: 10.0,
            first_bet_bonus: 5.0,
            signup_bonus: 5.0,
            max_bonus_per_user: 1_000.0,
            bonus_expiry_days: 30,
            expiry_sweep_secs: 3_600,
        }
    }
}

/// Credentials for the seamless game-provider protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub operator_code: String,
    pub secret_key: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_code: "local".to_string(),
            secret_key: String::new(),
        }
    }
}

/// Configuration loader with environment variable support.
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables.
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            EngineConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("failed to read {}: {}", path, e))
        })?;

        toml::from_str(&content)
            .map_err(|e| EngineError::Configuration(format!("failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(&self, config: &mut EngineConfig) -> EngineResult<()> {
        if let Ok(limit) = env::var("SETTLIQ_INSTANT_LIMIT_USD") {
            config.withdraw.instant_limit_usd = limit.parse().map_err(|_| {
                EngineError::Configuration(format!(
                    "invalid SETTLIQ_INSTANT_LIMIT_USD: {}",
                    limit
                ))
            })?;
        }
        if let Ok(ttl) = env::var("SETTLIQ_RATE_TTL_SECS") {
            config.exchange.rate_ttl_secs = ttl.parse().map_err(|_| {
                EngineError::Configuration(format!("invalid SETTLIQ_RATE_TTL_SECS: {}", ttl))
            })?;
        }
        if let Ok(enabled) = env::var("SETTLIQ_REFERRAL_ENABLED") {
            config.referral.enabled = enabled.parse().map_err(|_| {
                EngineError::Configuration(format!(
                    "invalid SETTLIQ_REFERRAL_ENABLED: {}",
                    enabled
                ))
            })?;
        }
        if let Ok(code) = env::var("SETTLIQ_OPERATOR_CODE") {
            config.operator.operator_code = code;
        }
        if let Ok(key) = env::var("SETTLIQ_SECRET_KEY") {
            config.operator.secret_key = key;
        }

        Ok(())
    }

    fn validate(&self, config: &EngineConfig) -> EngineResult<()> {
        let games = &config.games;
        if games.odds_denominator == 0 || games.fee_denominator == 0 {
            return Err(EngineError::Configuration(
                "odds/fee denominators cannot be zero".to_string(),
            ));
        }
        if games.fee_numerator >= games.fee_denominator {
            return Err(EngineError::Configuration(
                "fee ratio must be below 100%".to_string(),
            ));
        }
        if games.trx_min_bet > games.trx_max_bet || games.usdt_min_bet > games.usdt_max_bet {
            return Err(EngineError::Configuration(
                "bet minimum exceeds maximum".to_string(),
            ));
        }
        if config.withdraw.instant_limit_usd <= 0.0 {
            return Err(EngineError::Configuration(
                "instant withdrawal limit must be positive".to_string(),
            ));
        }
        if config.exchange.rate_ttl_secs == 0 || config.exchange.rate_ttl_secs > 60 {
            return Err(EngineError::Configuration(
                "rate TTL must be between 1 and 60 seconds".to_string(),
            ));
        }
        if config.referral.bonus_expiry_days < 1 {
            return Err(EngineError::Configuration(
                "bonus expiry must be at least one day".to_string(),
            ));
        }
        if config.sweep.confirm_timeout_secs == 0 {
            return Err(EngineError::Configuration(
                "confirmation timeout cannot be zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn save(&self, config: &EngineConfig, path: &str) -> EngineResult<()> {
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            EngineError::Configuration(format!("failed to serialize config: {}", e))
        })?;

        std::fs::write(path, toml_string)
            .map_err(|e| EngineError::Configuration(format!("failed to write {}: {}", path, e)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_is_valid() {
        let loader = ConfigLoader::new();
        let config = EngineConfig::default();
        assert!(loader.validate(&config).is_ok());
        assert_eq!(config.withdraw.instant_limit_usd, 200.0);
        assert_eq!(config.games.odds_numerator, 195);
    }

    #[test]
    fn rejects_bad_values() {
        let loader = ConfigLoader::new();

        let mut config = EngineConfig::default();
        config.games.fee_numerator = 100;
        assert!(loader.validate(&config).is_err());

        let mut config = EngineConfig::default();
        config.exchange.rate_ttl_secs = 120;
        assert!(loader.validate(&config).is_err());
    }

    #[test]
    fn save_and_load_round_trip() -> EngineResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let original = EngineConfig::default();
        let loader = ConfigLoader::new();
        loader.save(&original, path)?;

        let loaded = ConfigLoader::new().with_path(path).load()?;
        assert_eq!(loaded.games.odds_numerator, original.games.odds_numerator);
        assert_eq!(
            loaded.withdraw.instant_limit_usd,
            original.withdraw.instant_limit_usd
        );

        Ok(())
    }

    #[test]
    fn bet_limits_by_currency() {
        let games = GamesConfig::default();
        assert!(games.bet_limits(Currency::Trx).is_some());
        assert!(games.bet_limits(Currency::Eth).is_none());
    }
}
