//! # Swap Classifier
//!
//! Resolves pair roles, trade direction, and USD value for decoded swaps.
//! Two market regimes converge on the same [`SwapEvent`] shape:
//!
//! - conventional V2 pools, where the pair's token slots decide which leg is
//!   the quote currency and the nonzero in/out amounts decide direction;
//! - the launch-platform proxy, where the bonding-curve phase never emits the
//!   standard swap shape and the trade is reconstructed from the
//!   transaction's transfer set.
//!
//! Pairs where zero or two slots are quote currencies (including the
//! reference quote/quote pool) are not targets and are discarded here.
//! Sell-side events are dropped entirely: the system alerts on accumulation
//! pressure only.

use crate::config::QuoteSet;
use crate::decoder::BlockSwap;
use crate::errors::ClassifyError;
use crate::metadata::MetadataCache;
use crate::oracle::PriceOracle;
use crate::types::{amount_to_float, SwapEvent, TradeDirection};
use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::trace;

pub struct SwapClassifier {
    metadata: Arc<MetadataCache>,
    oracle: Arc<PriceOracle>,
    quotes: QuoteSet,
}

impl SwapClassifier {
    pub fn new(metadata: Arc<MetadataCache>, oracle: Arc<PriceOracle>, quotes: QuoteSet) -> Self {
        Self {
            metadata,
            oracle,
            quotes,
        }
    }

    pub async fn classify(&self, swap: &BlockSwap) -> Result<Option<SwapEvent>, ClassifyError> {
        if self.quotes.launch_proxy == Some(swap.pair) {
            return Ok(self.classify_proxy(swap).await);
        }
        self.classify_pool(swap).await
    }

    async fn classify_pool(&self, bs: &BlockSwap) -> Result<Option<SwapEvent>, ClassifyError> {
        let pair = self.metadata.pair_tokens(bs.pair).await?;
        let quote0 = self.quotes.is_quote(pair.token0);
        let quote1 = self.quotes.is_quote(pair.token1);

        // Neither slot, or both slots (a quote/quote reference pair), means
        // this pool is not a target.
        if quote0 == quote1 {
            trace!(target: "classifier", pair = ?bs.pair, "Not a target pair");
            return Ok(None);
        }

        let s = &bs.swap;
        let (base_token, quote_token, quote_in, quote_out, base_in, base_out) = if quote0 {
            (
                pair.token1,
                pair.token0,
                s.amount0_in,
                s.amount0_out,
                s.amount1_in,
                s.amount1_out,
            )
        } else {
            (
                pair.token0,
                pair.token1,
                s.amount1_in,
                s.amount1_out,
                s.amount0_in,
                s.amount0_out,
            )
        };

        // Inbound quote with outbound base is a buy; inbound base is a sell.
        let (direction, quote_amount) = if !quote_in.is_zero() && !base_out.is_zero() {
            (TradeDirection::Buy, quote_in)
        } else if !base_in.is_zero() && !quote_out.is_zero() {
            (TradeDirection::Sell, quote_out)
        } else {
            trace!(target: "classifier", pair = ?bs.pair, "Ambiguous swap legs, discarding");
            return Ok(None);
        };

        if direction == TradeDirection::Sell {
            trace!(target: "classifier", pair = ?bs.pair, "Dropping sell-side event");
            return Ok(None);
        }

        let usd_value = self.quote_to_usd(quote_token, quote_amount).await;
        Ok(Some(SwapEvent {
            block_number: bs.block_number,
            tx_hash: bs.tx_hash,
            log_index: bs.log_index,
            pair: bs.pair,
            base_token,
            quote_token,
            quote_amount,
            usd_value,
            direction,
        }))
    }

    /// Bonding-curve trades route through the fixed platform proxy. The paid
    /// amount is the sum of inbound quote-currency transfers to the proxy
    /// (falling back to the transaction's native value), and the target asset
    /// is the highest-value transfer leaving the proxy toward the
    /// transaction's originator.
    async fn classify_proxy(&self, bs: &BlockSwap) -> Option<SwapEvent> {
        let proxy = bs.pair;
        let ctx = &bs.ctx;

        let inbound: Vec<_> = ctx
            .transfers
            .iter()
            .filter(|t| t.to == proxy && self.quotes.is_quote(t.token))
            .collect();

        let (quote_token, quote_amount, usd_value) = if inbound.is_empty() {
            let native = self.quotes.wrapped_native;
            let usd = self.quote_to_usd(native, ctx.value).await;
            (native, ctx.value, usd)
        } else {
            let mut usd = 0.0;
            for transfer in &inbound {
                usd += self.quote_to_usd(transfer.token, transfer.value).await;
            }
            let lead_token = inbound[0].token;
            let lead_amount = inbound
                .iter()
                .filter(|t| t.token == lead_token)
                .fold(U256::zero(), |acc, t| acc + t.value);
            (lead_token, lead_amount, usd)
        };

        let target = ctx
            .transfers
            .iter()
            .filter(|t| t.from == proxy && t.to == ctx.from)
            .max_by_key(|t| t.value)?;

        if self.quotes.is_quote(target.token) {
            trace!(target: "classifier", token = ?target.token, "Proxy payout is a quote currency, discarding");
            return None;
        }

        Some(SwapEvent {
            block_number: bs.block_number,
            tx_hash: bs.tx_hash,
            log_index: bs.log_index,
            pair: proxy,
            base_token: target.token,
            quote_token,
            quote_amount,
            usd_value,
            direction: TradeDirection::Buy,
        })
    }

    async fn quote_to_usd(&self, quote_token: Address, amount: U256) -> f64 {
        let meta = self.metadata.token_meta(quote_token).await;
        let units = amount_to_float(amount, meta.decimals);
        if self.quotes.is_stable(quote_token) {
            units
        } else {
            units * self.oracle.native_to_usd_rate().await
        }
    }
}
