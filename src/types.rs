//! Core data model shared across the pipeline.
//!
//! Everything here is either a cached chain fact (token/pair metadata,
//! reserve/price snapshots) or a transient record flowing through one
//! decode → classify → filter → dispatch pass.

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256, U64};
use serde::{Deserialize, Serialize};
use std::time::Instant;

//================================================================================================//
//                                     CHAIN METADATA                                             //
//================================================================================================//

/// Resolved ERC-20 metadata. Immutable once resolved; cached for process lifetime.
#[derive(Debug, Clone)]
pub struct TokenMeta {
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
    pub name: String,
}

/// Token slot assignment of a V2-style pair. Slot order is whatever the pool
/// contract reports; it is never sorted or normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairMeta {
    pub pair: Address,
    pub token0: Address,
    pub token1: Address,
}

/// Point-in-time reserve reading. Valid only while younger than the
/// configured freshness window.
#[derive(Debug, Clone, Copy)]
pub struct ReserveSnapshot {
    pub reserve0: U256,
    pub reserve1: U256,
    pub captured_at: Instant,
}

/// Cached native→USD conversion rate.
#[derive(Debug, Clone, Copy)]
pub struct PriceQuote {
    pub rate: f64,
    pub captured_at: Instant,
}

//================================================================================================//
//                                     RAW CHAIN EVENTS                                           //
//================================================================================================//

/// A log entry as received from any transport (HTTP receipt, WS subscription,
/// webhook push). Block/index fields may be absent on pending logs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
    #[serde(default)]
    pub log_index: Option<U64>,
}

impl RawLog {
    pub fn block_number(&self) -> u64 {
        self.block_number.map(|n| n.as_u64()).unwrap_or_default()
    }

    pub fn log_index(&self) -> u64 {
        self.log_index.map(|n| n.as_u64()).unwrap_or_default()
    }

    pub fn tx_hash(&self) -> H256 {
        self.transaction_hash.unwrap_or_default()
    }
}

/// The four amount words of a V2 swap log payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapLog {
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
}

/// A decoded ERC-20 transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLog {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Closed tagged union over the event kinds this system recognizes, resolved
/// through a single signature→tag lookup. Everything else is `Unknown` and
/// discarded without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedEvent {
    Swap(SwapLog),
    Transfer(TransferLog),
    Unknown,
}

/// Transaction-level context needed by the proxy/bonding-curve path: the
/// originating address, the native value sent, and every transfer decoded
/// from the same transaction.
#[derive(Debug, Clone, Default)]
pub struct TxContext {
    pub from: Address,
    pub value: U256,
    pub transfers: Vec<TransferLog>,
}

//================================================================================================//
//                                   CLASSIFIED EVENTS                                            //
//================================================================================================//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    Buy,
    Sell,
}

/// A fully classified swap: pair roles resolved, direction inferred, quote
/// amount converted to USD. Produced per decoded log, consumed once by the
/// filter pipeline, then discarded.
#[derive(Debug, Clone)]
pub struct SwapEvent {
    pub block_number: u64,
    pub tx_hash: H256,
    pub log_index: u64,
    pub pair: Address,
    pub base_token: Address,
    pub quote_token: Address,
    pub quote_amount: U256,
    pub usd_value: f64,
    pub direction: TradeDirection,
}

/// Evidence assembled by the amount gate for one token within one block.
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub token: Address,
    pub block_number: u64,
    pub max_single_usd: f64,
    pub block_total_usd: f64,
    pub buy_count: usize,
    pub reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
}

//================================================================================================//
//                                   MARKET DATA & ALERTS                                         //
//================================================================================================//

/// Recent market snapshot for a token, fetched from the external
/// market-data service by the indicator gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub price_change_m5: Option<f64>,
    pub price_change_h1: Option<f64>,
    pub price_change_h6: Option<f64>,
    pub price_change_h24: Option<f64>,
    pub volume_h24: Option<f64>,
    pub buys_h24: Option<u64>,
    pub sells_h24: Option<u64>,
    pub holders: Option<u64>,
    pub market_cap: Option<f64>,
}

/// Delivery outcome for one notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub channel: String,
    pub delivered: bool,
    pub detail: Option<String>,
}

/// The persisted record of one dispatched alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub token: Address,
    pub symbol: String,
    pub name: String,
    pub reasons: Vec<String>,
    pub snapshot: Option<MarketSnapshot>,
    pub deliveries: Vec<DeliveryStatus>,
    pub created_at: DateTime<Utc>,
}

//================================================================================================//
//                                    NUMERIC HELPERS                                             //
//================================================================================================//

/// Lossy U256→f64 conversion. Fine for alert-threshold math; never used for
/// on-chain value computation.
pub fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0.0, |acc, &limb| acc * 18_446_744_073_709_551_616.0 + limb as f64)
}

/// Converts a raw token amount into a float using the token's decimals.
pub fn amount_to_float(value: U256, decimals: u8) -> f64 {
    u256_to_f64(value) / 10f64.powi(decimals as i32)
}
