//! Exchange rate gateway.
//!
//! Conversions pivot through USD using spot prices from a pluggable
//! [`PriceSource`]. A short-TTL cache bounds upstream call volume; an
//! unreachable source with no fresh cache entry fails the conversion rather
//! than defaulting to a zero or 1:1 rate.

use crate::config::ExchangeConfig;
use crate::errors::{EngineError, EngineResult};
use crate::money::{Amount, Currency};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// External spot price feed. Implementations query a market data provider;
/// tests and the simulator use [`StaticRates`].
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// USD price of one unit of `currency`.
    async fn spot_usd(&self, currency: Currency) -> EngineResult<Amount>;
}

/// Fixed price table, settable at runtime.
pub struct StaticRates {
    rates: DashMap<Currency, Amount>,
}

impl StaticRates {
    pub fn new() -> Self {
        Self {
            rates: DashMap::new(),
        }
    }

    pub fn set(&self, currency: Currency, usd_price: Amount) {
        self.rates.insert(currency, usd_price);
    }

    pub fn clear(&self, currency: Currency) {
        self.rates.remove(&currency);
    }
}

impl Default for StaticRates {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for StaticRates {
    async fn spot_usd(&self, currency: Currency) -> EngineResult<Amount> {
        self.rates
            .get(&currency)
            .map(|r| *r)
            .ok_or(EngineError::RateUnavailable(currency))
    }
}

struct CachedRate {
    usd_price: Amount,
    fetched_at: Instant,
}

/// Conversion gateway with per-currency caching.
pub struct RateGateway {
    source: Arc<dyn PriceSource>,
    cache: DashMap<Currency, CachedRate>,
    ttl: Duration,
}

impl RateGateway {
    pub fn new(source: Arc<dyn PriceSource>, config: &ExchangeConfig) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            ttl: Duration::from_secs(config.rate_ttl_secs),
        }
    }

    /// USD price for one unit of `currency`, served from cache when fresh.
    pub async fn usd_rate(&self, currency: Currency) -> EngineResult<Amount> {
        if currency.is_usd_pegged() {
            return Ok(Amount::from_units(1));
        }

        if let Some(cached) = self.cache.get(&currency) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.usd_price);
            }
        }

        let usd_price = self.source.spot_usd(currency).await?;
        if !usd_price.is_positive() {
            return Err(EngineError::RateUnavailable(currency));
        }
        self.cache.insert(
            currency,
            CachedRate {
                usd_price,
                fetched_at: Instant::now(),
            },
        );
        Ok(usd_price)
    }

    /// Convert `amount` of `from` into `to`, pivoting through USD.
    pub async fn convert(
        &self,
        amount: Amount,
        from: Currency,
        to: Currency,
    ) -> EngineResult<Amount> {
        if from == to {
            return Ok(amount);
        }
        let from_rate = self.usd_rate(from).await?;
        let to_rate = self.usd_rate(to).await?;

        let micros = amount.micros() * from_rate.micros() / to_rate.micros();
        Ok(Amount::from_micros(micros))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway_with(rates: &[(Currency, &str)]) -> RateGateway {
        let source = StaticRates::new();
        for (c, p) in rates {
            source.set(*c, p.parse().unwrap());
        }
        RateGateway::new(Arc::new(source), &ExchangeConfig::default())
    }

    #[tokio::test]
    async fn converts_through_usd() {
        let gw = gateway_with(&[(Currency::Trx, "0.12"), (Currency::Eth, "3000")]);

        let usd = gw
            .convert(Amount::from_units(100), Currency::Trx, Currency::Usd)
            .await
            .unwrap();
        assert_eq!(usd, "12".parse().unwrap());

        let eth = gw
            .convert(Amount::from_units(600), Currency::Usd, Currency::Eth)
            .await
            .unwrap();
        assert_eq!(eth, "0.2".parse().unwrap());
    }

    #[tokio::test]
    async fn pegged_currencies_are_one_to_one() {
        let gw = gateway_with(&[]);
        let out = gw
            .convert(Amount::from_units(50), Currency::Usd, Currency::Usdt)
            .await
            .unwrap();
        assert_eq!(out, Amount::from_units(50));
    }

    #[tokio::test]
    async fn missing_rate_is_an_error_not_zero() {
        let gw = gateway_with(&[]);
        let err = gw
            .convert(Amount::from_units(1), Currency::Sol, Currency::Usd)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RateUnavailable(Currency::Sol)));
    }

    #[tokio::test]
    async fn cache_survives_source_outage_within_ttl() {
        let source = Arc::new(StaticRates::new());
        source.set(Currency::Sol, "150".parse().unwrap());
        let gw = RateGateway::new(source.clone(), &ExchangeConfig::default());

        let first = gw.usd_rate(Currency::Sol).await.unwrap();
        source.clear(Currency::Sol);
        let second = gw.usd_rate(Currency::Sol).await.unwrap();
        assert_eq!(first, second);
    }
}
