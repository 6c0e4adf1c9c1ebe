//! Price oracle contract and reference implementations.
//!
//! The engine treats any returned price as authoritative for that operation
//! and performs no retries of its own. The caching/fallback policy lives
//! here: a fresh cache window, then last-known-good prices, then hardcoded
//! defaults as a last resort. Only when every layer fails does a bet get
//! rejected with `PriceUnavailable`.

use crate::errors::{EngineResult, GameError};
use crate::types::Currency;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

/// Current USD price per unit of a currency.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_price(&self, currency: Currency) -> EngineResult<f64>;
}

/// Convert a USD amount to crypto at the given price.
pub fn usd_to_crypto(usd_amount: f64, price: f64) -> EngineResult<f64> {
    if !price.is_finite() || price <= 0.0 {
        return Err(GameError::Validation(format!(
            "invalid price data: {}",
            price
        )));
    }
    Ok(usd_amount / price)
}

/// Convert a crypto amount to USD at the given price.
pub fn crypto_to_usd(crypto_amount: f64, price: f64) -> EngineResult<f64> {
    if !price.is_finite() || price <= 0.0 {
        return Err(GameError::Validation(format!(
            "invalid price data: {}",
            price
        )));
    }
    Ok(crypto_amount * price)
}

/// Fixed price table. Used by the demo binary and as the upstream for
/// [`CachingPriceOracle`] in tests.
pub struct StaticPriceOracle {
    prices: HashMap<Currency, f64>,
}

impl StaticPriceOracle {
    pub fn new(prices: HashMap<Currency, f64>) -> Self {
        Self { prices }
    }

    /// The fallback quotes the original deployment shipped with.
    pub fn with_default_prices() -> Self {
        Self::new(HashMap::from([
            (Currency::Btc, 30_000.0),
            (Currency::Eth, 1_800.0),
        ]))
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn get_price(&self, currency: Currency) -> EngineResult<f64> {
        self.prices
            .get(&currency)
            .copied()
            .ok_or(GameError::PriceUnavailable(currency))
    }
}

/// Caching decorator over an upstream oracle.
///
/// Lookup order: fresh cache entry, upstream fetch, stale cache entry,
/// configured fallback price. The upstream is typically an HTTP quote
/// client; it is injected so this policy stays testable.
pub struct CachingPriceOracle {
    upstream: Arc<dyn PriceOracle>,
    ttl: Duration,
    fallback: HashMap<Currency, f64>,
    cache: RwLock<HashMap<Currency, (f64, Instant)>>,
}

impl CachingPriceOracle {
    pub fn new(
        upstream: Arc<dyn PriceOracle>,
        ttl: Duration,
        fallback: HashMap<Currency, f64>,
    ) -> Self {
        Self {
            upstream,
            ttl,
            fallback,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PriceOracle for CachingPriceOracle {
    async fn get_price(&self, currency: Currency) -> EngineResult<f64> {
        if let Some((price, fetched_at)) = self.cache.read().await.get(&currency).copied() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(price);
            }
        }

        match self.upstream.get_price(currency).await {
            Ok(price) => {
                self.cache
                    .write()
                    .await
                    .insert(currency, (price, Instant::now()));
                Ok(price)
            }
            Err(err) => {
                if let Some((price, _)) = self.cache.read().await.get(&currency).copied() {
                    warn!(%currency, error = %err, "price fetch failed, using last known price");
                    return Ok(price);
                }
                if let Some(price) = self.fallback.get(&currency).copied() {
                    warn!(%currency, error = %err, "price fetch failed, using fallback price");
                    return Ok(price);
                }
                Err(GameError::PriceUnavailable(currency))
            }
        }
    }
}
