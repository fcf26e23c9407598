//! # Filter Pipeline
//!
//! Three sequential gates between classified buys and operator alerts:
//!
//! 1. **Amount gate** — per-token aggregation of one block's buys against a
//!    single-trade and a cumulative USD threshold.
//! 2. **Cooldown gate** — atomic per-token check-and-set, placed before the
//!    costlier indicator check so external API calls are skipped entirely
//!    whenever a look-alike alert is already in flight or recently sent.
//! 3. **Indicator gate** — market-snapshot rules under an `any`/`all`
//!    policy. Fails closed: a fetch or parse error aborts that one candidate
//!    and never defaults to "trigger".
//!
//! Lock contention is an expected control-flow outcome, not an error. The
//! provisional hold taken at the cooldown gate closes the race window between
//! "decided to alert" and "cooldown recorded"; the final TTL (base plus
//! random jitter) is committed only after all gates pass.

use crate::config::{IndicatorPolicy, IndicatorRule, PriceWindow};
use crate::errors::FilterError;
use crate::market_data::MarketData;
use crate::types::{AlertCandidate, MarketSnapshot, SwapEvent, TradeDirection};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ethers::types::Address;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

//================================================================================================//
//                                      AMOUNT GATE                                               //
//================================================================================================//

#[derive(Debug, Clone, Copy)]
pub struct AmountGate {
    pub single_usd: f64,
    pub cumulative_usd: f64,
}

impl AmountGate {
    /// Aggregates all buy events for each token within one block. A token
    /// passes if its largest single trade meets the single threshold OR the
    /// block's cumulative total meets the cumulative threshold. Both checks
    /// are inclusive at equality.
    pub fn evaluate_block(&self, events: &[SwapEvent]) -> Vec<AlertCandidate> {
        let mut per_token: HashMap<Address, (f64, f64, usize, u64)> = HashMap::new();
        for event in events {
            if event.direction != TradeDirection::Buy {
                continue;
            }
            let entry = per_token
                .entry(event.base_token)
                .or_insert((0.0, 0.0, 0, event.block_number));
            entry.0 = entry.0.max(event.usd_value);
            entry.1 += event.usd_value;
            entry.2 += 1;
        }

        per_token
            .into_iter()
            .filter(|(_, (max_single, total, _, _))| {
                *max_single >= self.single_usd || *total >= self.cumulative_usd
            })
            .map(|(token, (max_single, total, count, block))| AlertCandidate {
                token,
                block_number: block,
                max_single_usd: max_single,
                block_total_usd: total,
                buy_count: count,
                reasons: Vec::new(),
                created_at: Utc::now(),
            })
            .collect()
    }
}

//================================================================================================//
//                                     COOLDOWN GATE                                              //
//================================================================================================//

/// External atomic check-and-set primitive behind the cooldown gate. The
/// atomicity of `try_acquire` is the only thing per-token correctness relies
/// on in streaming mode; queue ordering guarantees nothing.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Creates the lock if absent. Returns `true` when this caller created
    /// it; `false` means the token is in cooldown.
    async fn try_acquire(&self, token: Address, ttl: Duration) -> Result<bool, FilterError>;

    /// Replaces the provisional hold with the final TTL.
    async fn commit(&self, token: Address, ttl: Duration) -> Result<(), FilterError>;

    /// Drops a provisional hold that never became an alert.
    async fn release(&self, token: Address) -> Result<(), FilterError>;
}

/// In-process reference implementation. The shard lock taken by the DashMap
/// entry API makes check-and-set atomic.
#[derive(Default)]
pub struct InMemoryCooldownStore {
    locks: DashMap<Address, Instant>,
}

impl InMemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownStore for InMemoryCooldownStore {
    async fn try_acquire(&self, token: Address, ttl: Duration) -> Result<bool, FilterError> {
        let now = Instant::now();
        match self.locks.entry(token) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() > now {
                    Ok(false)
                } else {
                    occupied.insert(now + ttl);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn commit(&self, token: Address, ttl: Duration) -> Result<(), FilterError> {
        self.locks.insert(token, Instant::now() + ttl);
        Ok(())
    }

    async fn release(&self, token: Address) -> Result<(), FilterError> {
        self.locks.remove(&token);
        Ok(())
    }
}

//================================================================================================//
//                                    INDICATOR GATE                                              //
//================================================================================================//

fn window_value(snapshot: &MarketSnapshot, window: PriceWindow) -> Option<f64> {
    match window {
        PriceWindow::M5 => snapshot.price_change_m5,
        PriceWindow::H1 => snapshot.price_change_h1,
        PriceWindow::H6 => snapshot.price_change_h6,
        PriceWindow::H24 => snapshot.price_change_h24,
    }
}

fn window_label(window: PriceWindow) -> &'static str {
    match window {
        PriceWindow::M5 => "5m",
        PriceWindow::H1 => "1h",
        PriceWindow::H6 => "6h",
        PriceWindow::H24 => "24h",
    }
}

/// Evaluates one rule against a snapshot. `Some(reason)` when it fires; a
/// missing field simply does not fire.
pub fn evaluate_rule(rule: &IndicatorRule, snapshot: &MarketSnapshot) -> Option<String> {
    match rule {
        IndicatorRule::PriceChange { window, min_pct } => {
            let value = window_value(snapshot, *window)?;
            (value >= *min_pct).then(|| {
                format!(
                    "{} price change {value:+.1}% (min {min_pct:+.1}%)",
                    window_label(*window)
                )
            })
        }
        IndicatorRule::Volume { min_usd_h24 } => {
            let volume = snapshot.volume_h24?;
            (volume >= *min_usd_h24)
                .then(|| format!("24h volume ${volume:.0} (min ${min_usd_h24:.0})"))
        }
        IndicatorRule::BuyPressure { min_buy_sell_ratio } => {
            let buys = snapshot.buys_h24? as f64;
            let sells = snapshot.sells_h24? as f64;
            let ratio = if sells == 0.0 { buys } else { buys / sells };
            (ratio >= *min_buy_sell_ratio)
                .then(|| format!("buy/sell ratio {ratio:.2} (min {min_buy_sell_ratio:.2})"))
        }
        IndicatorRule::Holders { min } => {
            let holders = snapshot.holders?;
            (holders >= *min).then(|| format!("{holders} holders (min {min})"))
        }
        IndicatorRule::MarketCap { min_usd } => {
            let cap = snapshot.market_cap?;
            (cap >= *min_usd).then(|| format!("market cap ${cap:.0} (min ${min_usd:.0})"))
        }
    }
}

//================================================================================================//
//                                       PIPELINE                                                 //
//================================================================================================//

/// A candidate that cleared every gate, ready for dispatch.
#[derive(Debug, Clone)]
pub struct PassedCandidate {
    pub candidate: AlertCandidate,
    pub snapshot: MarketSnapshot,
}

pub struct FilterPipeline {
    amount: AmountGate,
    cooldown: Arc<dyn CooldownStore>,
    market: Arc<dyn MarketData>,
    rules: Vec<IndicatorRule>,
    policy: IndicatorPolicy,
    cooldown_base: Duration,
    cooldown_jitter: Duration,
}

impl FilterPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        amount: AmountGate,
        cooldown: Arc<dyn CooldownStore>,
        market: Arc<dyn MarketData>,
        rules: Vec<IndicatorRule>,
        policy: IndicatorPolicy,
        cooldown_base: Duration,
        cooldown_jitter: Duration,
    ) -> Self {
        Self {
            amount,
            cooldown,
            market,
            rules,
            policy,
            cooldown_base,
            cooldown_jitter,
        }
    }

    /// Runs one block's worth of classified buys through all three gates.
    pub async fn process_block(&self, events: &[SwapEvent]) -> Vec<PassedCandidate> {
        let mut passed = Vec::new();
        for mut candidate in self.amount.evaluate_block(events) {
            if let Some(snapshot) = self.run_gates(&mut candidate).await {
                passed.push(PassedCandidate {
                    candidate,
                    snapshot,
                });
            }
        }
        passed
    }

    async fn run_gates(&self, candidate: &mut AlertCandidate) -> Option<MarketSnapshot> {
        let token = candidate.token;

        // Cooldown first: contention means an alert is in flight or recent,
        // so the indicator fetch is skipped entirely.
        match self.cooldown.try_acquire(token, self.cooldown_base).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(target: "filters", ?token, "Token in cooldown, skipping candidate");
                return None;
            }
            Err(e) => {
                warn!(target: "filters", ?token, error = %e, "Cooldown store failure, failing closed");
                return None;
            }
        }

        let snapshot = match self.market.snapshot(token).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(target: "filters", ?token, error = %e, "Indicator fetch failed, failing closed");
                self.release_hold(token).await;
                return None;
            }
        };

        let reasons: Vec<String> = self
            .rules
            .iter()
            .filter_map(|rule| evaluate_rule(rule, &snapshot))
            .collect();

        let pass = match self.policy {
            IndicatorPolicy::Any => !reasons.is_empty(),
            IndicatorPolicy::All => reasons.len() == self.rules.len(),
        };
        if !pass {
            debug!(
                target: "filters",
                ?token,
                fired = reasons.len(),
                enabled = self.rules.len(),
                policy = ?self.policy,
                "Indicator policy not satisfied"
            );
            self.release_hold(token).await;
            return None;
        }

        // All gates passed: commit the final TTL with jitter so similar
        // tokens do not re-trigger in lockstep.
        let jitter_secs = if self.cooldown_jitter.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.cooldown_jitter.as_secs())
        };
        let final_ttl = self.cooldown_base + Duration::from_secs(jitter_secs);
        if let Err(e) = self.cooldown.commit(token, final_ttl).await {
            warn!(target: "filters", ?token, error = %e, "Cooldown commit failed after gates passed");
        }

        info!(
            target: "filters",
            ?token,
            max_single_usd = candidate.max_single_usd,
            block_total_usd = candidate.block_total_usd,
            reasons = reasons.len(),
            "Candidate passed all gates"
        );
        candidate.reasons = reasons;
        Some(snapshot)
    }

    async fn release_hold(&self, token: Address) {
        if let Err(e) = self.cooldown.release(token).await {
            warn!(target: "filters", ?token, error = %e, "Failed to release provisional cooldown hold");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{H256, U256};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn buy(token: Address, usd: f64, block: u64) -> SwapEvent {
        SwapEvent {
            block_number: block,
            tx_hash: H256::zero(),
            log_index: 0,
            pair: addr(0xFFFF),
            base_token: token,
            quote_token: addr(0x2),
            quote_amount: U256::zero(),
            usd_value: usd,
            direction: TradeDirection::Buy,
        }
    }

    fn gate() -> AmountGate {
        AmountGate {
            single_usd: 400.0,
            cumulative_usd: 1000.0,
        }
    }

    #[test]
    fn single_trade_threshold_is_inclusive() {
        let g = gate();
        assert_eq!(g.evaluate_block(&[buy(addr(1), 400.0, 5)]).len(), 1);
        assert_eq!(g.evaluate_block(&[buy(addr(1), 399.99, 5)]).len(), 0);
    }

    #[test]
    fn below_both_thresholds_yields_no_candidate() {
        // Scenario B: $120 + $130 + $160 = $410 clears neither threshold.
        let g = gate();
        let events = vec![
            buy(addr(1), 120.0, 5),
            buy(addr(1), 130.0, 5),
            buy(addr(1), 160.0, 5),
        ];
        assert!(g.evaluate_block(&events).is_empty());
    }

    #[test]
    fn single_threshold_passes_regardless_of_cumulative() {
        // Scenario C: a fourth $600 trade passes on the single threshold.
        let g = gate();
        let events = vec![
            buy(addr(1), 120.0, 5),
            buy(addr(1), 130.0, 5),
            buy(addr(1), 160.0, 5),
            buy(addr(1), 600.0, 5),
        ];
        let candidates = g.evaluate_block(&events);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].max_single_usd, 600.0);
        assert_eq!(candidates[0].buy_count, 4);
        assert!((candidates[0].block_total_usd - 1010.0).abs() < 1e-9);
    }

    #[test]
    fn cumulative_threshold_alone_suffices() {
        let g = gate();
        let events = vec![
            buy(addr(1), 350.0, 5),
            buy(addr(1), 350.0, 5),
            buy(addr(1), 350.0, 5),
        ];
        assert_eq!(g.evaluate_block(&events).len(), 1);
    }

    #[test]
    fn tokens_aggregate_independently() {
        let g = gate();
        let events = vec![
            buy(addr(1), 500.0, 5),
            buy(addr(2), 100.0, 5),
        ];
        let candidates = g.evaluate_block(&events);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].token, addr(1));
    }

    #[tokio::test]
    async fn concurrent_acquire_has_exactly_one_winner() {
        let store = Arc::new(InMemoryCooldownStore::new());
        let token = addr(7);
        let ttl = Duration::from_secs(60);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_acquire(token, ttl).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let store = InMemoryCooldownStore::new();
        let token = addr(7);
        assert!(store.try_acquire(token, Duration::from_millis(20)).await.unwrap());
        assert!(!store.try_acquire(token, Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.try_acquire(token, Duration::from_millis(20)).await.unwrap());
    }

    struct StaticMarket {
        snapshot: Option<MarketSnapshot>,
        calls: AtomicUsize,
    }

    impl StaticMarket {
        fn ok(snapshot: MarketSnapshot) -> Self {
            Self {
                snapshot: Some(snapshot),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                snapshot: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MarketData for StaticMarket {
        async fn snapshot(&self, _token: Address) -> Result<MarketSnapshot, FilterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.snapshot
                .clone()
                .ok_or_else(|| FilterError::Indicator("unavailable".to_string()))
        }
    }

    fn hot_snapshot() -> MarketSnapshot {
        MarketSnapshot {
            price_change_h1: Some(12.0),
            volume_h24: Some(5_000.0),
            ..Default::default()
        }
    }

    fn two_rules() -> Vec<IndicatorRule> {
        vec![
            IndicatorRule::PriceChange {
                window: PriceWindow::H1,
                min_pct: 5.0,
            },
            // Will not fire against hot_snapshot (volume too low).
            IndicatorRule::Volume {
                min_usd_h24: 100_000.0,
            },
        ]
    }

    fn pipeline(
        market: Arc<dyn MarketData>,
        store: Arc<dyn CooldownStore>,
        policy: IndicatorPolicy,
    ) -> FilterPipeline {
        FilterPipeline::new(
            gate(),
            store,
            market,
            two_rules(),
            policy,
            Duration::from_secs(60),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn policy_any_triggers_when_one_indicator_fires() {
        let market = Arc::new(StaticMarket::ok(hot_snapshot()));
        let store = Arc::new(InMemoryCooldownStore::new());
        let p = pipeline(market, store, IndicatorPolicy::Any);
        let passed = p.process_block(&[buy(addr(1), 500.0, 5)]).await;
        assert_eq!(passed.len(), 1);
        assert_eq!(passed[0].candidate.reasons.len(), 1);
        assert!(passed[0].candidate.reasons[0].contains("price change"));
    }

    #[tokio::test]
    async fn policy_all_requires_every_indicator() {
        let market = Arc::new(StaticMarket::ok(hot_snapshot()));
        let store = Arc::new(InMemoryCooldownStore::new());
        let p = pipeline(market, store.clone(), IndicatorPolicy::All);
        assert!(p.process_block(&[buy(addr(1), 500.0, 5)]).await.is_empty());
        // The provisional hold was released, so a later candidate is not
        // suppressed by one that never alerted.
        assert!(store.try_acquire(addr(1), Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn indicator_fetch_failure_fails_closed() {
        let market = Arc::new(StaticMarket::failing());
        let store = Arc::new(InMemoryCooldownStore::new());
        let p = pipeline(market, store.clone(), IndicatorPolicy::Any);
        assert!(p.process_block(&[buy(addr(1), 500.0, 5)]).await.is_empty());
        assert!(store.try_acquire(addr(1), Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn cooldown_skips_indicator_fetch_entirely() {
        let market = Arc::new(StaticMarket::ok(hot_snapshot()));
        let store = Arc::new(InMemoryCooldownStore::new());
        store
            .try_acquire(addr(1), Duration::from_secs(60))
            .await
            .unwrap();
        let p = pipeline(market.clone(), store, IndicatorPolicy::Any);
        assert!(p.process_block(&[buy(addr(1), 500.0, 5)]).await.is_empty());
        assert_eq!(market.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn passing_candidate_commits_cooldown() {
        let market = Arc::new(StaticMarket::ok(hot_snapshot()));
        let store = Arc::new(InMemoryCooldownStore::new());
        let p = pipeline(market, store.clone(), IndicatorPolicy::Any);
        assert_eq!(p.process_block(&[buy(addr(1), 500.0, 5)]).await.len(), 1);
        // Token now in cooldown: the same block again yields nothing.
        assert_eq!(p.process_block(&[buy(addr(1), 500.0, 5)]).await.len(), 0);
    }
}
