//! # Metadata Cache
//!
//! Resolves and caches token decimals/symbol/name, pair token slots, and
//! reserve snapshots. Token and pair metadata are immutable once resolved and
//! cached for process lifetime (the working set is a few thousand tokens, so
//! no eviction). Reserves live behind a freshness window so a high-frequency
//! loop never issues one reserve lookup per event.
//!
//! Chain data is occasionally non-conformant: malformed decimals/symbol/name
//! responses degrade to defaults (18, "UNKNOWN") instead of halting the
//! pipeline. Concurrent first-resolution writes are idempotent and allowed to
//! race; reserves are last-writer-wins.

use crate::errors::RpcError;
use crate::rpc::{eth_call, ChainRpc};
use crate::types::{PairMeta, ReserveSnapshot, TokenMeta};
use ethers::types::{Address, U256};
use ethers::utils::id;
use moka::future::Cache;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

static SEL_DECIMALS: Lazy<[u8; 4]> = Lazy::new(|| id("decimals()"));
static SEL_SYMBOL: Lazy<[u8; 4]> = Lazy::new(|| id("symbol()"));
static SEL_NAME: Lazy<[u8; 4]> = Lazy::new(|| id("name()"));
static SEL_TOKEN0: Lazy<[u8; 4]> = Lazy::new(|| id("token0()"));
static SEL_TOKEN1: Lazy<[u8; 4]> = Lazy::new(|| id("token1()"));
static SEL_GET_RESERVES: Lazy<[u8; 4]> = Lazy::new(|| id("getReserves()"));

const DEFAULT_DECIMALS: u8 = 18;
const UNKNOWN_SYMBOL: &str = "UNKNOWN";
const UNKNOWN_NAME: &str = "Unknown Token";

pub struct MetadataCache {
    rpc: Arc<dyn ChainRpc>,
    tokens: RwLock<HashMap<Address, Arc<TokenMeta>>>,
    pairs: RwLock<HashMap<Address, PairMeta>>,
    reserves: Cache<Address, ReserveSnapshot>,
    reserve_freshness: Duration,
}

impl MetadataCache {
    pub fn new(rpc: Arc<dyn ChainRpc>, reserve_freshness: Duration) -> Self {
        Self {
            rpc,
            tokens: RwLock::new(HashMap::with_capacity(2048)),
            pairs: RwLock::new(HashMap::with_capacity(2048)),
            reserves: Cache::builder()
                .time_to_live(reserve_freshness)
                .max_capacity(16_384)
                .build(),
            reserve_freshness,
        }
    }

    /// Pre-seeds a token so well-known quote currencies never cost a
    /// round-trip.
    pub async fn seed_token(&self, meta: TokenMeta) {
        self.tokens.write().await.insert(meta.address, Arc::new(meta));
    }

    /// Resolves decimals/symbol/name, lazily on first encounter. Never fails:
    /// RPC or decode trouble degrades to defaults with a warning.
    pub async fn token_meta(&self, token: Address) -> Arc<TokenMeta> {
        if let Some(meta) = self.tokens.read().await.get(&token) {
            return meta.clone();
        }

        let decimals = match eth_call(self.rpc.as_ref(), token, SEL_DECIMALS.to_vec()).await {
            Ok(bytes) => decode_u8(&bytes).unwrap_or_else(|| {
                warn!(target: "metadata", ?token, "Non-standard decimals() response, defaulting to 18");
                DEFAULT_DECIMALS
            }),
            Err(e) => {
                warn!(target: "metadata", ?token, error = %e, "decimals() call failed, defaulting to 18");
                DEFAULT_DECIMALS
            }
        };

        let symbol = match eth_call(self.rpc.as_ref(), token, SEL_SYMBOL.to_vec()).await {
            Ok(bytes) => decode_string(&bytes).unwrap_or_else(|| {
                warn!(target: "metadata", ?token, "Non-standard symbol() response");
                UNKNOWN_SYMBOL.to_string()
            }),
            Err(e) => {
                warn!(target: "metadata", ?token, error = %e, "symbol() call failed");
                UNKNOWN_SYMBOL.to_string()
            }
        };

        let name = match eth_call(self.rpc.as_ref(), token, SEL_NAME.to_vec()).await {
            Ok(bytes) => decode_string(&bytes).unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            Err(_) => UNKNOWN_NAME.to_string(),
        };

        let meta = Arc::new(TokenMeta {
            address: token,
            decimals,
            symbol,
            name,
        });
        debug!(
            target: "metadata",
            ?token,
            decimals = meta.decimals,
            symbol = %meta.symbol,
            "Resolved token metadata"
        );
        // Races with a concurrent resolver are harmless: both write the same fact.
        self.tokens.write().await.insert(token, meta.clone());
        meta
    }

    /// Pre-seeds a pair whose slot assignment is already known.
    pub async fn seed_pair(&self, meta: PairMeta) {
        self.pairs.write().await.insert(meta.pair, meta);
    }

    /// Resolves the token slots of a V2 pair. Slot order is whatever the
    /// contract reports and is never normalized.
    pub async fn pair_tokens(&self, pair: Address) -> Result<PairMeta, RpcError> {
        if let Some(meta) = self.pairs.read().await.get(&pair) {
            return Ok(*meta);
        }

        let t0_bytes = eth_call(self.rpc.as_ref(), pair, SEL_TOKEN0.to_vec()).await?;
        let t1_bytes = eth_call(self.rpc.as_ref(), pair, SEL_TOKEN1.to_vec()).await?;
        let token0 = decode_address(&t0_bytes)
            .ok_or_else(|| RpcError::Decode(format!("token0() of {pair:?}")))?;
        let token1 = decode_address(&t1_bytes)
            .ok_or_else(|| RpcError::Decode(format!("token1() of {pair:?}")))?;

        let meta = PairMeta { pair, token0, token1 };
        self.pairs.write().await.insert(pair, meta);
        trace!(target: "metadata", ?pair, ?token0, ?token1, "Resolved pair tokens");
        Ok(meta)
    }

    /// Serves the cached reserve snapshot while younger than the freshness
    /// window; re-fetches and replaces it otherwise. Two lookups within the
    /// window issue exactly one underlying RPC call. Concurrent refreshes of
    /// the same stale pair may race; last writer wins.
    pub async fn reserves(&self, pair: Address) -> Result<ReserveSnapshot, RpcError> {
        // The cache TTL already evicts on this schedule; the capture-time
        // check guards against a snapshot surviving past its window.
        if let Some(snapshot) = self.reserves.get(&pair).await {
            if snapshot.captured_at.elapsed() < self.reserve_freshness {
                return Ok(snapshot);
            }
        }

        let bytes = eth_call(self.rpc.as_ref(), pair, SEL_GET_RESERVES.to_vec()).await?;
        if bytes.len() < 64 {
            return Err(RpcError::Decode(format!(
                "getReserves() of {pair:?}: payload too short ({} bytes)",
                bytes.len()
            )));
        }
        let snapshot = ReserveSnapshot {
            reserve0: U256::from_big_endian(&bytes[0..32]),
            reserve1: U256::from_big_endian(&bytes[32..64]),
            captured_at: Instant::now(),
        };
        self.reserves.insert(pair, snapshot).await;
        trace!(target: "metadata", ?pair, "Refreshed reserve snapshot");
        Ok(snapshot)
    }
}

//================================================================================================//
//                                    ABI DECODE HELPERS                                          //
//================================================================================================//

fn decode_u256(data: &[u8]) -> Option<U256> {
    if data.len() < 32 {
        return None;
    }
    Some(U256::from_big_endian(&data[0..32]))
}

fn decode_u8(data: &[u8]) -> Option<u8> {
    let value = decode_u256(data)?;
    if value > U256::from(u8::MAX) {
        return None;
    }
    Some(value.low_u64() as u8)
}

fn decode_address(data: &[u8]) -> Option<Address> {
    if data.len() < 32 {
        return None;
    }
    Some(Address::from_slice(&data[12..32]))
}

/// Lenient ABI string decode. Handles the standard dynamic encoding plus the
/// non-standard bytes32 symbol some older tokens return.
fn decode_string(data: &[u8]) -> Option<String> {
    if data.len() >= 64 {
        let offset = U256::from_big_endian(&data[0..32]);
        if offset < U256::from(data.len()) {
            let off = offset.low_u64() as usize;
            if data.len() >= off + 32 {
                let length = U256::from_big_endian(&data[off..off + 32]);
                if length <= U256::from(data.len()) {
                    let len = length.low_u64() as usize;
                    if data.len() >= off + 32 + len {
                        if let Ok(s) = String::from_utf8(data[off + 32..off + 32 + len].to_vec()) {
                            let s = s.trim_matches('\0').trim().to_string();
                            if !s.is_empty() {
                                return Some(s);
                            }
                        }
                    }
                }
            }
        }
    }

    // bytes32-style: fixed word, null padded
    if data.len() == 32 {
        let text: Vec<u8> = data.iter().copied().take_while(|&b| b != 0).collect();
        if let Ok(s) = String::from_utf8(text) {
            let s = s.trim().to_string();
            if !s.is_empty() {
                return Some(s);
            }
        }
    }
    None
}
