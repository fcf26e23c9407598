//! # Webhook Listener
//!
//! Managed stream providers push block payloads over HTTP instead of a
//! subscription socket. The endpoint unwraps the envelope, stamps each log
//! with the block number from the envelope when the log itself omits it, and
//! forwards the block's logs as a single batch so the amount gate sees the
//! whole block at once, through the same worker queue the WebSocket path
//! uses.

use crate::errors::ListenerError;
use crate::types::RawLog;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: WebhookEvent,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    block: WebhookBlock,
}

#[derive(Debug, Deserialize)]
struct WebhookBlock {
    number: u64,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp: u64,
    #[serde(default)]
    logs: Vec<RawLog>,
}

pub async fn serve(
    bind: &str,
    tx: mpsc::Sender<Vec<RawLog>>,
    cancel: CancellationToken,
) -> Result<(), ListenerError> {
    let app = Router::new()
        .route("/ingest", post(ingest))
        .with_state(tx);
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| ListenerError::Bind(e.to_string()))?;
    info!(target: "webhook", bind, "Webhook listener ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ListenerError::Closed(e.to_string()))
}

async fn ingest(
    State(tx): State<mpsc::Sender<Vec<RawLog>>>,
    Json(envelope): Json<WebhookEnvelope>,
) -> StatusCode {
    let block = envelope.event.data.block;
    debug!(
        target: "webhook",
        block = block.number,
        logs = block.logs.len(),
        "Webhook block received"
    );

    let batch = stamp_block(block);
    if batch.is_empty() {
        return StatusCode::ACCEPTED;
    }
    if tx.send(batch).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

fn stamp_block(block: WebhookBlock) -> Vec<RawLog> {
    let number = block.number;
    block
        .logs
        .into_iter()
        .map(|mut log| {
            if log.block_number.is_none() {
                log.block_number = Some(number.into());
            }
            log
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_unwraps_block_logs() {
        let raw = serde_json::json!({
            "event": {
                "data": {
                    "block": {
                        "number": 34_000_100u64,
                        "timestamp": 1_700_000_000u64,
                        "logs": [
                            {
                                "address": "0x16b9a82891338f9ba80e2d6970fdda79d1eb0dae",
                                "topics": [
                                    "0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822"
                                ],
                                "data": "0x00"
                            }
                        ]
                    }
                }
            }
        });
        let envelope: WebhookEnvelope = serde_json::from_value(raw).unwrap();
        let block = envelope.event.data.block;
        assert_eq!(block.number, 34_000_100);
        assert!(block.logs[0].block_number.is_none());

        // Logs without their own block number inherit the envelope's, and the
        // whole block travels as one batch.
        let batch = stamp_block(block);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].block_number(), 34_000_100);
    }

    #[test]
    fn missing_logs_defaults_to_empty() {
        let raw = serde_json::json!({
            "event": { "data": { "block": { "number": 5u64 } } }
        });
        let envelope: WebhookEnvelope = serde_json::from_value(raw).unwrap();
        assert!(envelope.event.data.block.logs.is_empty());
    }
}
