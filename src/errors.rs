//! # Centralized Error Handling
//!
//! One typed error enum per subsystem, rolled up into the top-level
//! [`WatcherError`]. Keeping the hierarchy explicit makes the degradation
//! rules of the pipeline (skip, fall back, fail closed) visible at the type
//! level instead of hiding them in string matching.

use thiserror::Error;

/// The top-level error type, encapsulating all possible failures within the watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
    #[error("Price oracle error: {0}")]
    Oracle(#[from] OracleError),
    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),
    #[error("Filter pipeline error: {0}")]
    Filter(#[from] FilterError),
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),
    #[error("System shut down")]
    Shutdown,
}

/// Startup configuration failures. The only fatal error class in the system.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Transport-level RPC failures. Exhaustion skips the current unit of work
/// (one block or one event); it never aborts the ingestion loop.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    ErrorResponse { code: i64, message: String },
    #[error("exhausted {attempts} attempts across all endpoints for {method}")]
    Exhausted { method: String, attempts: u32 },
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Price oracle refresh failures. Callers degrade to the last known rate;
/// these never propagate past the oracle boundary.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("rpc failure during refresh: {0}")]
    Rpc(#[from] RpcError),
    #[error("reference pool has zero reserves")]
    ZeroReserves,
    #[error("reference pool does not contain the wrapped native token")]
    BadReferencePool,
}

/// Failures while resolving pair roles for classification. Callers log and
/// discard the event in question.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("pair metadata lookup failed: {0}")]
    Metadata(#[from] RpcError),
}

/// Filter pipeline failures. Indicator failures abort exactly one candidate
/// (fail closed); cooldown contention is control flow, not an error.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("indicator fetch failed: {0}")]
    Indicator(String),
    #[error("cooldown store failure: {0}")]
    Store(String),
}

/// Per-channel delivery and record-write failures. Logged individually;
/// never affect other channels or the loop.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("channel {channel} delivery failed: {reason}")]
    Channel { channel: String, reason: String },
    #[error("alert record write failed: {0}")]
    Store(String),
}

/// Streaming/webhook listener failures, all recoverable via reconnect.
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("subscription request failed: {0}")]
    Subscribe(String),
    #[error("connection stalled: no data for {0} seconds")]
    Stalled(u64),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("webhook bind failed: {0}")]
    Bind(String),
}
