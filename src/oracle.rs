//! # Price Oracle
//!
//! Maintains the native→USD conversion rate read from one designated
//! reference pool (native/stable), cached for a TTL. A transient refresh
//! failure degrades to the last known rate (logged) instead of blocking the
//! pipeline; with no prior rate the oracle returns 0.0, which values swaps at
//! $0 and naturally fails the downstream amount gate.

use crate::errors::OracleError;
use crate::metadata::MetadataCache;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{amount_to_float, PriceQuote};
use ethers::types::Address;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct PriceOracle {
    metadata: Arc<MetadataCache>,
    reference_pool: Address,
    wrapped_native: Address,
    ttl: Duration,
    retry: RetryPolicy,
    last: RwLock<Option<PriceQuote>>,
}

impl PriceOracle {
    pub fn new(
        metadata: Arc<MetadataCache>,
        reference_pool: Address,
        wrapped_native: Address,
        ttl: Duration,
    ) -> Self {
        Self {
            metadata,
            reference_pool,
            wrapped_native,
            ttl,
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(2),
                jitter_factor: 0.2,
            },
            last: RwLock::new(None),
        }
    }

    /// Current native→USD rate. Never errors: refresh trouble serves
    /// the stale rate, and a cold start with a failing refresh yields 0.0.
    pub async fn native_to_usd_rate(&self) -> f64 {
        if let Some(quote) = *self.last.read().await {
            if quote.captured_at.elapsed() < self.ttl {
                return quote.rate;
            }
        }

        match retry_with_backoff(&self.retry, "oracle_refresh", || self.refresh()).await {
            Ok(rate) => {
                *self.last.write().await = Some(PriceQuote {
                    rate,
                    captured_at: Instant::now(),
                });
                debug!(target: "oracle", rate, "Refreshed native→USD rate");
                rate
            }
            Err(e) => {
                let last = *self.last.read().await;
                match last {
                    Some(quote) => {
                        warn!(
                            target: "oracle",
                            error = %e,
                            stale_secs = quote.captured_at.elapsed().as_secs(),
                            rate = quote.rate,
                            "Oracle refresh failed, serving stale rate"
                        );
                        quote.rate
                    }
                    None => {
                        warn!(
                            target: "oracle",
                            error = %e,
                            "Oracle refresh failed with no prior rate, valuing native at $0"
                        );
                        0.0
                    }
                }
            }
        }
    }

    async fn refresh(&self) -> Result<f64, OracleError> {
        let pair = self.metadata.pair_tokens(self.reference_pool).await?;
        let snapshot = self.metadata.reserves(self.reference_pool).await?;

        let (native_reserve, stable_reserve, stable_token) = if pair.token0 == self.wrapped_native {
            (snapshot.reserve0, snapshot.reserve1, pair.token1)
        } else if pair.token1 == self.wrapped_native {
            (snapshot.reserve1, snapshot.reserve0, pair.token0)
        } else {
            return Err(OracleError::BadReferencePool);
        };

        if native_reserve.is_zero() || stable_reserve.is_zero() {
            return Err(OracleError::ZeroReserves);
        }

        let native_meta = self.metadata.token_meta(self.wrapped_native).await;
        let stable_meta = self.metadata.token_meta(stable_token).await;

        Ok(amount_to_float(stable_reserve, stable_meta.decimals)
            / amount_to_float(native_reserve, native_meta.decimals))
    }

    #[cfg(test)]
    pub(crate) async fn seed_quote(&self, rate: f64, age: Duration) {
        *self.last.write().await = Some(PriceQuote {
            rate,
            captured_at: Instant::now() - age,
        });
    }
}
