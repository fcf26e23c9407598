//! # swapwatch
//!
//! Watches V2-style AMM swap activity on an EVM chain, values each trade in
//! USD, and pushes alerts for tokens showing sustained buy pressure. The
//! pipeline is a straight line: ingest raw logs (polling, WebSocket stream,
//! or webhook push), decode them, classify each swap against the configured
//! quote currencies, then run candidates through the amount → cooldown →
//! indicator gates before dispatching to the notification channels.

pub mod classifier;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod errors;
pub mod filters;
pub mod ingest;
pub mod market_data;
pub mod metadata;
pub mod oracle;
pub mod retry;
pub mod rpc;
pub mod types;
pub mod webhook;
