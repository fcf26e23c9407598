//! # Market-Data Client
//!
//! Fetches the recent market snapshot (price-change windows, buy/sell
//! activity, holders, market cap) the indicator gate evaluates. Any transport
//! or parse failure surfaces as [`FilterError::Indicator`], which the gate
//! treats as fail-closed for that one candidate.

use crate::errors::FilterError;
use crate::types::MarketSnapshot;
use async_trait::async_trait;
use ethers::types::Address;
use serde::Deserialize;
use std::time::Duration;
use tracing::trace;

/// Seam for the indicator gate, so the pipeline is testable without a live
/// market-data service.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn snapshot(&self, token: Address) -> Result<MarketSnapshot, FilterError>;
}

pub struct MarketDataClient {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    chain_id: String,
}

impl MarketDataClient {
    pub fn new(api_base: String, api_key: Option<String>, chain_id: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_base,
            api_key,
            chain_id,
        }
    }
}

#[async_trait]
impl MarketData for MarketDataClient {
    async fn snapshot(&self, token: Address) -> Result<MarketSnapshot, FilterError> {
        let url = format!(
            "{}/latest/dex/tokens/{:?}",
            self.api_base.trim_end_matches('/'),
            token
        );
        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-KEY", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FilterError::Indicator(format!("request: {e}")))?;
        if !response.status().is_success() {
            return Err(FilterError::Indicator(format!(
                "status {} for {url}",
                response.status()
            )));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| FilterError::Indicator(format!("parse: {e}")))?;

        // The service reports one entry per pool the token trades in; the
        // deepest pool is the representative one.
        let pair = body
            .pairs
            .unwrap_or_default()
            .into_iter()
            .filter(|p| {
                p.chain_id
                    .as_deref()
                    .map(|c| c == self.chain_id)
                    .unwrap_or(true)
            })
            .max_by(|a, b| {
                let liq_a = a.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
                let liq_b = b.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
                liq_a.total_cmp(&liq_b)
            })
            .ok_or_else(|| FilterError::Indicator(format!("no market data for {token:?}")))?;

        let snapshot = pair.into_snapshot();
        trace!(target: "market_data", ?token, ?snapshot, "Fetched market snapshot");
        Ok(snapshot)
    }
}

//================================================================================================//
//                                      WIRE TYPES                                                //
//================================================================================================//

#[derive(Debug, Deserialize)]
struct TokenResponse {
    pairs: Option<Vec<PairStats>>,
}

#[derive(Debug, Deserialize)]
struct PairStats {
    #[serde(rename = "chainId")]
    chain_id: Option<String>,
    liquidity: Option<LiquidityStats>,
    volume: Option<VolumeStats>,
    #[serde(rename = "txns")]
    transactions: Option<TxnStats>,
    #[serde(rename = "priceChange")]
    price_change: Option<PriceChangeStats>,
    holders: Option<u64>,
    #[serde(rename = "marketCap")]
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LiquidityStats {
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct VolumeStats {
    h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TxnStats {
    h24: Option<TxnCounts>,
}

#[derive(Debug, Deserialize)]
struct TxnCounts {
    buys: Option<u64>,
    sells: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PriceChangeStats {
    m5: Option<f64>,
    h1: Option<f64>,
    h6: Option<f64>,
    h24: Option<f64>,
}

impl PairStats {
    fn into_snapshot(self) -> MarketSnapshot {
        let counts = self.transactions.and_then(|t| t.h24);
        let change = self.price_change;
        MarketSnapshot {
            price_change_m5: change.as_ref().and_then(|c| c.m5),
            price_change_h1: change.as_ref().and_then(|c| c.h1),
            price_change_h6: change.as_ref().and_then(|c| c.h6),
            price_change_h24: change.as_ref().and_then(|c| c.h24),
            volume_h24: self.volume.and_then(|v| v.h24),
            buys_h24: counts.as_ref().and_then(|c| c.buys),
            sells_h24: counts.as_ref().and_then(|c| c.sells),
            holders: self.holders,
            market_cap: self.market_cap,
        }
    }
}
