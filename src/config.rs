//! Configuration with validation, defaults, TOML files and environment
//! overrides.

use crate::errors::{EngineResult, GameError};
use crate::types::Currency;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashcoreConfig {
    pub engine: EngineConfig,
    pub oracle: OracleConfig,
    pub wallet: WalletConfig,
}

/// Round engine timing and fairness parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seed feeding the commit-reveal crash-point derivation.
    pub seed: String,
    /// Growth factor applied per tick: `m <- m * (1 + growth_rate)`.
    pub growth_rate: f64,
    /// Multiplier clock cadence.
    pub tick_interval_ms: u64,
    /// Scheduler backstop cadence; it only starts a round if none is
    /// running.
    pub round_interval_ms: u64,
    /// In-line retry attempts for persisting the crash transition.
    pub crash_persist_attempts: u32,
    /// Initial backoff between those attempts; doubles each retry.
    pub crash_persist_backoff_ms: u64,
    /// Command queue depth for the engine actor.
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: "crypto_crash_seed".to_string(),
            growth_rate: 0.01,
            tick_interval_ms: 100,
            round_interval_ms: 10_000,
            crash_persist_attempts: 5,
            crash_persist_backoff_ms: 50,
            command_buffer: 1024,
        }
    }
}

/// Price oracle caching and fallback policy
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub cache_ttl_ms: u64,
    /// Last-resort prices when the upstream is down and no cache exists.
    pub fallback_prices: HashMap<Currency, f64>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 60_000,
            fallback_prices: HashMap::from([
                (Currency::Btc, 30_000.0),
                (Currency::Eth, 1_800.0),
            ]),
        }
    }
}

/// Wallet provisioning for newly registered players
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub initial_balances: HashMap<Currency, f64>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            initial_balances: HashMap::from([(Currency::Btc, 10.0), (Currency::Eth, 10.0)]),
        }
    }
}

impl CrashcoreConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.engine.seed.is_empty() {
            return Err(GameError::Validation("engine.seed must not be empty".into()));
        }
        if !(self.engine.growth_rate > 0.0 && self.engine.growth_rate < 1.0) {
            return Err(GameError::Validation(format!(
                "engine.growth_rate must be in (0, 1), got {}",
                self.engine.growth_rate
            )));
        }
        if self.engine.tick_interval_ms == 0 {
            return Err(GameError::Validation(
                "engine.tick_interval_ms must be positive".into(),
            ));
        }
        if self.engine.round_interval_ms == 0 {
            return Err(GameError::Validation(
                "engine.round_interval_ms must be positive".into(),
            ));
        }
        if self.engine.crash_persist_attempts == 0 {
            return Err(GameError::Validation(
                "engine.crash_persist_attempts must be at least 1".into(),
            ));
        }
        if self.engine.command_buffer == 0 {
            return Err(GameError::Validation(
                "engine.command_buffer must be positive".into(),
            ));
        }
        if self
            .wallet
            .initial_balances
            .values()
            .any(|b| !b.is_finite() || *b < 0.0)
        {
            return Err(GameError::Validation(
                "wallet.initial_balances must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from an optional TOML file, applies `CRASHCORE_*`
/// environment overrides, then validates.
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

    pub fn load(&self) -> EngineResult<CrashcoreConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            CrashcoreConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> EngineResult<CrashcoreConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GameError::Validation(format!("failed to read config {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| GameError::Validation(format!("failed to parse config {}: {}", path, e)))
    }

    fn apply_env_overrides(&self, config: &mut CrashcoreConfig) -> EngineResult<()> {
        if let Ok(seed) = env::var("CRASHCORE_SEED") {
            config.engine.seed = seed;
        }
        if let Ok(rate) = env::var("CRASHCORE_GROWTH_RATE") {
            config.engine.growth_rate = parse_env("CRASHCORE_GROWTH_RATE", &rate)?;
        }
        if let Ok(interval) = env::var("CRASHCORE_TICK_INTERVAL_MS") {
            config.engine.tick_interval_ms = parse_env("CRASHCORE_TICK_INTERVAL_MS", &interval)?;
        }
        if let Ok(interval) = env::var("CRASHCORE_ROUND_INTERVAL_MS") {
            config.engine.round_interval_ms = parse_env("CRASHCORE_ROUND_INTERVAL_MS", &interval)?;
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> EngineResult<T> {
    value
        .parse()
        .map_err(|_| GameError::Validation(format!("invalid value for {}: '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CrashcoreConfig::default();
        config.validate().unwrap();
        assert_eq!(config.engine.seed, "crypto_crash_seed");
        assert_eq!(config.engine.growth_rate, 0.01);
        assert_eq!(config.engine.tick_interval_ms, 100);
        assert_eq!(config.oracle.fallback_prices[&Currency::Btc], 30_000.0);
    }

    #[test]
    fn test_validation_rejects_bad_growth_rate() {
        let mut config = CrashcoreConfig::default();
        config.engine.growth_rate = 0.0;
        assert!(config.validate().is_err());

        config.engine.growth_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_seed() {
        let mut config = CrashcoreConfig::default();
        config.engine.seed.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_with_partial_file() {
        let parsed: CrashcoreConfig = toml::from_str(
            r#"
            [engine]
            growth_rate = 0.02
            tick_interval_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(parsed.engine.growth_rate, 0.02);
        assert_eq!(parsed.engine.tick_interval_ms, 50);
        // untouched sections keep their defaults
        assert_eq!(parsed.engine.seed, "crypto_crash_seed");
        assert_eq!(parsed.wallet.initial_balances[&Currency::Eth], 10.0);
    }
}
