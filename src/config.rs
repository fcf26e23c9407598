//! # Configuration
//!
//! All runtime parameters load from a single JSON file into the [`Config`]
//! struct, the single source of truth for the process. Every knob the
//! pipeline depends on (quote currencies, thresholds, TTLs, endpoints,
//! credentials) is externally supplied; validation happens once at startup
//! and a misconfigured process refuses to boot.

use crate::errors::ConfigError;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

//================================================================================================//
//                                       Top-Level Config                                         //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub chain: ChainConfig,
    pub quotes: QuoteConfig,
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub stream: StreamConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Configuration errors are the only fatal error
    /// class in the system, so everything load-bearing is checked here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.rpc_http_endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one RPC HTTP endpoint is required".to_string(),
            ));
        }
        if self.quotes.stablecoins.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one stablecoin quote address is required".to_string(),
            ));
        }
        if self.quotes.reference_pool == Address::zero() {
            return Err(ConfigError::Invalid(
                "reference_pool must be set for native pricing".to_string(),
            ));
        }
        if self.thresholds.single_usd <= 0.0 || self.thresholds.cumulative_usd <= 0.0 {
            return Err(ConfigError::Invalid(
                "amount thresholds must be positive".to_string(),
            ));
        }
        if self.indicators.rules.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one indicator rule must be enabled".to_string(),
            ));
        }
        if self.stream.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "stream.worker_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

//================================================================================================//
//                                        Sections                                                //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_http_endpoints: Vec<String>,
    #[serde(default)]
    pub rpc_ws_endpoints: Vec<String>,
    /// Blocks behind the head the poll loop stays to only read confirmed data.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Fixed delay between endpoint-rotation retries.
    #[serde(default = "default_rpc_retry_delay_ms")]
    pub rpc_retry_delay_ms: u64,
}

fn default_confirmations() -> u64 {
    3
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_rpc_timeout_secs() -> u64 {
    10
}
fn default_rpc_retry_delay_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteConfig {
    /// Wrapped native token (e.g. WBNB). 18 decimals assumed when seeding.
    pub wrapped_native: Address,
    /// Designated stablecoin quote currencies.
    pub stablecoins: Vec<Address>,
    /// The native/stable pool the price oracle reads its rate from.
    pub reference_pool: Address,
    /// Launch-platform proxy handling bonding-curve trades, if watched.
    #[serde(default)]
    pub launch_proxy: Option<Address>,
    /// Decimals of the stablecoins above (chain-dependent; 18 on BNB chain).
    #[serde(default = "default_stable_decimals")]
    pub stablecoin_decimals: u8,
}

fn default_stable_decimals() -> u8 {
    18
}

/// The quote-currency set handed to the classifier. Derived from
/// [`QuoteConfig`] once at startup so the hot path does no config plumbing.
#[derive(Debug, Clone)]
pub struct QuoteSet {
    pub wrapped_native: Address,
    stables: HashSet<Address>,
    pub launch_proxy: Option<Address>,
}

impl QuoteSet {
    pub fn from_config(quotes: &QuoteConfig) -> Self {
        Self {
            wrapped_native: quotes.wrapped_native,
            stables: quotes.stablecoins.iter().copied().collect(),
            launch_proxy: quotes.launch_proxy,
        }
    }

    pub fn is_quote(&self, token: Address) -> bool {
        token == self.wrapped_native || self.stables.contains(&token)
    }

    pub fn is_stable(&self, token: Address) -> bool {
        self.stables.contains(&token)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// A single trade at or above this USD value passes the amount gate.
    pub single_usd: f64,
    /// One block's cumulative buys at or above this USD value pass as well.
    pub cumulative_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_cooldown_secs")]
    pub base_secs: u64,
    /// Random jitter added on commit so look-alike tokens do not re-trigger
    /// in lockstep.
    #[serde(default = "default_cooldown_jitter_secs")]
    pub jitter_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base_secs: default_cooldown_secs(),
            jitter_secs: default_cooldown_jitter_secs(),
        }
    }
}

fn default_cooldown_secs() -> u64 {
    900
}
fn default_cooldown_jitter_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Reserve snapshots older than this are re-fetched.
    #[serde(default = "default_reserve_freshness_secs")]
    pub reserve_freshness_secs: u64,
    /// Native→USD rate TTL.
    #[serde(default = "default_price_ttl_secs")]
    pub price_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reserve_freshness_secs: default_reserve_freshness_secs(),
            price_ttl_secs: default_price_ttl_secs(),
        }
    }
}

fn default_reserve_freshness_secs() -> u64 {
    15
}
fn default_price_ttl_secs() -> u64 {
    30
}

impl CacheConfig {
    pub fn reserve_freshness(&self) -> Duration {
        Duration::from_secs(self.reserve_freshness_secs)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorPolicy {
    /// One firing indicator suffices.
    Any,
    /// Every enabled indicator must fire.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceWindow {
    M5,
    H1,
    H6,
    H24,
}

/// One enabled indicator. Rules are listed in priority order; trigger
/// reasons are reported in the same order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorRule {
    PriceChange { window: PriceWindow, min_pct: f64 },
    Volume { min_usd_h24: f64 },
    BuyPressure { min_buy_sell_ratio: f64 },
    Holders { min: u64 },
    MarketCap { min_usd: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Chain identifier expected by the market-data service.
    #[serde(default = "default_market_chain")]
    pub chain_id: String,
    pub policy: IndicatorPolicy,
    pub rules: Vec<IndicatorRule>,
}

fn default_market_chain() -> String {
    "bsc".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    Telegram {
        bot_token: String,
        chat_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// A connection receiving nothing for this long is torn down and reopened.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// Quiet period after which a partially collected block of streamed logs
    /// is flushed to the workers.
    #[serde(default = "default_block_linger_ms")]
    pub block_linger_ms: u64,
    #[serde(default)]
    pub webhook_bind: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_depth: default_queue_depth(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            block_linger_ms: default_block_linger_ms(),
            webhook_bind: None,
        }
    }
}

fn default_worker_count() -> usize {
    4
}
fn default_queue_depth() -> usize {
    1_024
}
fn default_idle_timeout_secs() -> u64 {
    60
}
fn default_reconnect_base_ms() -> u64 {
    500
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_block_linger_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample_config() -> Config {
        serde_json::from_value(serde_json::json!({
            "chain": {
                "rpc_http_endpoints": ["http://localhost:8545"]
            },
            "quotes": {
                "wrapped_native": "0xbb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c",
                "stablecoins": ["0x55d398326f99059ff775485246999027b3197955"],
                "reference_pool": "0x16b9a82891338f9ba80e2d6970fdda79d1eb0dae"
            },
            "thresholds": { "single_usd": 400.0, "cumulative_usd": 1000.0 },
            "indicators": {
                "api_base": "https://market.example",
                "policy": "any",
                "rules": [
                    { "kind": "price_change", "window": "h1", "min_pct": 5.0 }
                ]
            }
        }))
        .expect("sample config must deserialize")
    }

    #[test]
    fn sample_config_validates() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn zero_endpoints_is_fatal() {
        let mut config = sample_config();
        config.chain.rpc_http_endpoints.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn quote_set_membership() {
        let config = sample_config();
        let quotes = QuoteSet::from_config(&config.quotes);
        let wbnb = config.quotes.wrapped_native;
        let usdt = config.quotes.stablecoins[0];
        let other = Address::from_str("0x000000000000000000000000000000000000dEaD").unwrap();

        assert!(quotes.is_quote(wbnb));
        assert!(quotes.is_quote(usdt));
        assert!(quotes.is_stable(usdt));
        assert!(!quotes.is_stable(wbnb));
        assert!(!quotes.is_quote(other));
    }
}
