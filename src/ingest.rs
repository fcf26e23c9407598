//! # Ingestion
//!
//! Two ingestion modes drive the shared decode → classify → filter →
//! dispatch pipeline:
//!
//! - **poll**: a single loop walks confirmed blocks strictly in order,
//!   invoking the pipeline inline. Per-block order is guaranteed; all work is
//!   serialized. A failing block is skipped, never fatal.
//! - **stream**: pushed log events are collected into block-shaped batches
//!   (webhook payloads arrive as whole blocks; WebSocket logs are grouped by
//!   block number with a linger flush) and fan out through a bounded queue to
//!   a worker pool for independent, concurrent classify+filter runs. The
//!   amount gate therefore aggregates per block in every mode. Cross-token
//!   ordering is not guaranteed; per-token correctness rests solely on the
//!   atomicity of the cooldown-lock acquisition. Connections reconnect with
//!   capped, jittered exponential backoff, and an idle watchdog tears down a
//!   connection that has received nothing for the configured interval (a
//!   silently stalled connection is otherwise indistinguishable from a
//!   healthy idle one).

use crate::classifier::SwapClassifier;
use crate::config::StreamConfig;
use crate::decoder::{decode_block_swaps, decode_pushed_batch, SWAP_TOPIC, TRANSFER_TOPIC};
use crate::dispatch::Dispatcher;
use crate::errors::{ConfigError, ListenerError, WatcherError};
use crate::filters::FilterPipeline;
use crate::metadata::MetadataCache;
use crate::retry::{backoff_delay, RetryPolicy};
use crate::rpc::{block_number, ChainRpc};
use crate::types::RawLog;
use ethers::types::Address;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

//================================================================================================//
//                                    SHARED PIPELINE                                             //
//================================================================================================//

/// The wired component graph both ingestion modes drive.
pub struct PipelineHandle {
    pub rpc: Arc<dyn ChainRpc>,
    pub metadata: Arc<MetadataCache>,
    pub classifier: Arc<SwapClassifier>,
    pub pipeline: Arc<FilterPipeline>,
    pub dispatcher: Arc<Dispatcher>,
    pub launch_proxy: Option<Address>,
}

impl PipelineHandle {
    /// Poll-mode unit of work: one whole block through every stage.
    pub async fn process_block(&self, number: u64) -> Result<(), WatcherError> {
        let swaps = decode_block_swaps(self.rpc.as_ref(), number, self.launch_proxy).await?;
        self.run_swaps(swaps, number).await;
        Ok(())
    }

    /// Stream/webhook unit of work: one block-shaped batch of pushed logs.
    /// Transaction context is reassembled from the logs themselves, so the
    /// proxy path and the cumulative amount threshold behave as in poll mode.
    pub async fn process_batch(&self, logs: Vec<RawLog>) {
        let block = logs.first().map(|log| log.block_number()).unwrap_or_default();
        let swaps = decode_pushed_batch(&logs, self.launch_proxy);
        self.run_swaps(swaps, block).await;
    }

    async fn run_swaps(&self, swaps: Vec<crate::decoder::BlockSwap>, block: u64) {
        let mut buys = Vec::new();
        for block_swap in &swaps {
            match self.classifier.classify(block_swap).await {
                Ok(Some(event)) => buys.push(event),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        target: "ingest",
                        block,
                        pair = ?block_swap.pair,
                        error = %e,
                        "Skipping unclassifiable swap"
                    );
                }
            }
        }
        if buys.is_empty() {
            return;
        }

        debug!(target: "ingest", block, buys = buys.len(), "Classified block buys");
        let passed = self.pipeline.process_block(&buys).await;
        for candidate in &passed {
            let token = self.metadata.token_meta(candidate.candidate.token).await;
            self.dispatcher.dispatch(candidate, &token).await;
        }
    }
}

//================================================================================================//
//                                       POLL MODE                                                //
//================================================================================================//

pub struct PollIngestor {
    handle: Arc<PipelineHandle>,
    confirmations: u64,
    interval: Duration,
    cancel: CancellationToken,
}

impl PollIngestor {
    pub fn new(
        handle: Arc<PipelineHandle>,
        confirmations: u64,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handle,
            confirmations,
            interval,
            cancel,
        }
    }

    /// Walks confirmed blocks strictly in order until cancelled. No error
    /// class is fatal here: a failing head lookup waits out the interval and
    /// a failing block is skipped.
    pub async fn run(&self) -> Result<(), WatcherError> {
        let mut next: Option<u64> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let head = match block_number(self.handle.rpc.as_ref()).await {
                Ok(head) => head,
                Err(e) => {
                    warn!(target: "ingest", error = %e, "Head lookup failed, retrying after interval");
                    self.wait_interval().await;
                    continue;
                }
            };
            let target = head.saturating_sub(self.confirmations);
            let mut cursor = next.unwrap_or(target);

            while cursor <= target {
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
                if let Err(e) = self.handle.process_block(cursor).await {
                    warn!(
                        target: "ingest",
                        block = cursor,
                        error = %e,
                        "Block processing failed, skipping"
                    );
                }
                cursor += 1;
            }
            next = Some(cursor);

            self.wait_interval().await;
        }
    }

    async fn wait_interval(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = sleep(self.interval) => {}
        }
    }
}

//================================================================================================//
//                                      STREAM MODE                                               //
//================================================================================================//

pub struct StreamIngestor {
    handle: Arc<PipelineHandle>,
    ws_endpoints: Vec<String>,
    config: StreamConfig,
    cancel: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct SubscriptionMessage {
    #[serde(default)]
    params: Option<SubscriptionParams>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionParams {
    #[serde(default)]
    result: Option<RawLog>,
}

/// Groups streamed logs into per-block batches so the amount gate sees one
/// block as a unit. A batch is flushed when a log from a different block
/// arrives, or after a quiet linger period for the trailing block.
async fn run_collector(
    mut raw: mpsc::Receiver<RawLog>,
    batches: mpsc::Sender<Vec<RawLog>>,
    linger: Duration,
    cancel: CancellationToken,
) {
    let mut current: Vec<RawLog> = Vec::new();
    let mut current_block: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = raw.recv() => match maybe {
                None => break,
                Some(log) => {
                    let block = log.block_number();
                    if current.is_empty() {
                        current_block = block;
                    } else if block != current_block {
                        let batch = std::mem::take(&mut current);
                        if batches.send(batch).await.is_err() {
                            return;
                        }
                        current_block = block;
                    }
                    current.push(log);
                }
            },
            _ = sleep(linger), if !current.is_empty() => {
                let batch = std::mem::take(&mut current);
                if batches.send(batch).await.is_err() {
                    return;
                }
            }
        }
    }

    if !current.is_empty() {
        let _ = batches.send(current).await;
    }
}

impl StreamIngestor {
    pub fn new(
        handle: Arc<PipelineHandle>,
        ws_endpoints: Vec<String>,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handle,
            ws_endpoints,
            config,
            cancel,
        }
    }

    pub async fn run(&self) -> Result<(), WatcherError> {
        if self.ws_endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "stream mode requires at least one RPC WebSocket endpoint".to_string(),
            )
            .into());
        }

        let (raw_tx, raw_rx) = mpsc::channel::<RawLog>(self.config.queue_depth);
        let (batch_tx, batch_rx) = mpsc::channel::<Vec<RawLog>>(self.config.queue_depth);
        let batch_rx = Arc::new(Mutex::new(batch_rx));

        let mut workers = Vec::with_capacity(self.config.worker_count);
        for worker_id in 0..self.config.worker_count {
            let handle = self.handle.clone();
            let rx = batch_rx.clone();
            let cancel = self.cancel.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let batch = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            maybe = guard.recv() => match maybe {
                                Some(batch) => batch,
                                None => return,
                            },
                        }
                    };
                    handle.process_batch(batch).await;
                }
            }));
            debug!(target: "ingest", worker_id, "Stream worker started");
        }

        let collector = tokio::spawn(run_collector(
            raw_rx,
            batch_tx.clone(),
            Duration::from_millis(self.config.block_linger_ms),
            self.cancel.clone(),
        ));

        if let Some(bind) = self.config.webhook_bind.clone() {
            let tx = batch_tx.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::webhook::serve(&bind, tx, cancel).await {
                    warn!(target: "ingest", error = %e, "Webhook listener terminated");
                }
            });
        }
        drop(batch_tx);

        let policy = RetryPolicy {
            max_attempts: u32::MAX,
            base_delay: Duration::from_millis(self.config.reconnect_base_ms),
            max_delay: Duration::from_millis(self.config.reconnect_max_ms),
            jitter_factor: 0.3,
        };
        let mut attempts: u32 = 0;

        while !self.cancel.is_cancelled() {
            let idx = rand::thread_rng().gen_range(0..self.ws_endpoints.len());
            let url = self.ws_endpoints[idx].clone();

            match self.run_connection(&url, &raw_tx).await {
                Ok(()) => break, // cancelled
                Err(e) => {
                    // A post-connect failure restarts the backoff ladder.
                    if !matches!(e, ListenerError::Connect(_) | ListenerError::Subscribe(_)) {
                        attempts = 0;
                    }
                    attempts += 1;
                    let delay = backoff_delay(&policy, attempts);
                    warn!(
                        target: "ingest",
                        endpoint = %url,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Stream connection lost, reconnecting with backoff"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }

        drop(raw_tx);
        let _ = collector.await;
        for worker in workers {
            let _ = worker.await;
        }
        Ok(())
    }

    async fn run_connection(
        &self,
        url: &str,
        tx: &mpsc::Sender<RawLog>,
    ) -> Result<(), ListenerError> {
        let (ws, _) = timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| ListenerError::Connect("connect timeout".to_string()))?
            .map_err(|e| ListenerError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        // Transfer logs are only needed when a launch proxy is watched.
        let mut topic0 = vec![format!("{:?}", *SWAP_TOPIC)];
        if self.handle.launch_proxy.is_some() {
            topic0.push(format!("{:?}", *TRANSFER_TOPIC));
        }
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["logs", { "topics": [topic0] }],
        });
        sink.send(Message::Text(request.to_string()))
            .await
            .map_err(|e| ListenerError::Subscribe(e.to_string()))?;
        info!(target: "ingest", endpoint = %url, "Log subscription established");

        let idle = Duration::from_secs(self.config.idle_timeout_secs);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                next = timeout(idle, stream.next()) => match next {
                    // Idle watchdog: tear down and reopen.
                    Err(_) => return Err(ListenerError::Stalled(self.config.idle_timeout_secs)),
                    Ok(None) => return Err(ListenerError::Closed("stream ended".to_string())),
                    Ok(Some(Err(e))) => return Err(ListenerError::Closed(e.to_string())),
                    Ok(Some(Ok(Message::Text(text)))) => {
                        if let Some(log) = parse_subscription_log(&text) {
                            if tx.send(log).await.is_err() {
                                return Err(ListenerError::Closed("worker queue closed".to_string()));
                            }
                        }
                    }
                    Ok(Some(Ok(_))) => {} // pings and binary frames
                },
            }
        }
    }
}

/// Extracts a log from an `eth_subscription` notification. Subscription
/// confirmations and anything malformed are ignored.
fn parse_subscription_log(text: &str) -> Option<RawLog> {
    let message: SubscriptionMessage = serde_json::from_str(text).ok()?;
    message.params?.result
}
