use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swapwatch::classifier::SwapClassifier;
use swapwatch::config::{Config, QuoteSet};
use swapwatch::dispatch::{build_notifiers, Dispatcher, InMemoryAlertStore};
use swapwatch::filters::{AmountGate, FilterPipeline, InMemoryCooldownStore};
use swapwatch::ingest::{PipelineHandle, PollIngestor, StreamIngestor};
use swapwatch::market_data::MarketDataClient;
use swapwatch::metadata::MetadataCache;
use swapwatch::oracle::PriceOracle;
use swapwatch::rpc::{ChainRpc, HttpRpcClient};
use swapwatch::types::TokenMeta;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "swapwatch", about = "AMM swap watcher and buy-pressure alerter")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
    /// Ingestion mode.
    #[arg(long, value_enum, default_value_t = Mode::Poll)]
    mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Mode {
    /// Walk confirmed blocks in order over HTTP RPC.
    Poll,
    /// Subscribe to pushed log events over WebSocket (and webhook, if bound).
    Stream,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();
    info!(target: "main", mode = ?cli.mode, "Starting swap watcher");

    let rpc: Arc<dyn ChainRpc> = Arc::new(HttpRpcClient::new(&config.chain)?);
    let metadata = Arc::new(MetadataCache::new(
        rpc.clone(),
        config.cache.reserve_freshness(),
    ));

    // Quote-currency metadata is known up front; seeding it keeps the hot
    // path from issuing RPC lookups for tokens that never change.
    metadata
        .seed_token(TokenMeta {
            address: config.quotes.wrapped_native,
            decimals: 18,
            symbol: "WNATIVE".to_string(),
            name: "Wrapped Native".to_string(),
        })
        .await;
    for (i, stable) in config.quotes.stablecoins.iter().enumerate() {
        metadata
            .seed_token(TokenMeta {
                address: *stable,
                decimals: config.quotes.stablecoin_decimals,
                symbol: format!("STABLE{i}"),
                name: "Stablecoin".to_string(),
            })
            .await;
    }

    let oracle = Arc::new(PriceOracle::new(
        metadata.clone(),
        config.quotes.reference_pool,
        config.quotes.wrapped_native,
        config.cache.price_ttl(),
    ));
    let classifier = Arc::new(SwapClassifier::new(
        metadata.clone(),
        oracle.clone(),
        QuoteSet::from_config(&config.quotes),
    ));

    let market = Arc::new(MarketDataClient::new(
        config.indicators.api_base.clone(),
        config.indicators.api_key.clone(),
        config.indicators.chain_id.clone(),
    ));
    let pipeline = Arc::new(FilterPipeline::new(
        AmountGate {
            single_usd: config.thresholds.single_usd,
            cumulative_usd: config.thresholds.cumulative_usd,
        },
        Arc::new(InMemoryCooldownStore::new()),
        market,
        config.indicators.rules.clone(),
        config.indicators.policy,
        Duration::from_secs(config.cooldown.base_secs),
        Duration::from_secs(config.cooldown.jitter_secs),
    ));

    let notifiers = build_notifiers(&config.channels);
    if notifiers.is_empty() {
        warn!(target: "main", "No notification channels configured; alerts will only be recorded");
    }
    let dispatcher = Arc::new(Dispatcher::new(
        notifiers,
        Arc::new(InMemoryAlertStore::new()),
    ));

    let handle = Arc::new(PipelineHandle {
        rpc,
        metadata,
        classifier,
        pipeline,
        dispatcher,
        launch_proxy: config.quotes.launch_proxy,
    });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(target: "main", "Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    match cli.mode {
        Mode::Poll => {
            PollIngestor::new(
                handle,
                config.chain.confirmations,
                Duration::from_millis(config.chain.poll_interval_ms),
                cancel,
            )
            .run()
            .await?;
        }
        Mode::Stream => {
            StreamIngestor::new(
                handle,
                config.chain.rpc_ws_endpoints.clone(),
                config.stream.clone(),
                cancel,
            )
            .run()
            .await?;
        }
    }

    info!(target: "main", "Swap watcher stopped");
    Ok(())
}
