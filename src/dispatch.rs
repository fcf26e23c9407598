//! # Dispatch
//!
//! Sends a formatted alert to every configured notification channel and
//! writes a persistent record. Delivery is deliberately not transactional:
//! partial delivery is acceptable, each channel failure is logged with its
//! own detail, and a record-write failure never suppresses notifications
//! (or vice versa).

use crate::config::ChannelConfig;
use crate::errors::DispatchError;
use crate::filters::PassedCandidate;
use crate::types::{AlertRecord, DeliveryStatus, TokenMeta};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// A formatted alert ready for delivery.
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub text: String,
    /// Optional inline action buttons: (label, url).
    pub buttons: Vec<(String, String)>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel_name(&self) -> &str;
    async fn send(&self, message: &AlertMessage) -> Result<(), DispatchError>;
}

/// Narrow write contract over the external persistence layer.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn record(&self, record: &AlertRecord) -> Result<(), DispatchError>;
}

//================================================================================================//
//                                   TELEGRAM CHANNEL                                             //
//================================================================================================//

pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            bot_token,
            chat_id,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel_name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), DispatchError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let keyboard: Vec<Vec<serde_json::Value>> = message
            .buttons
            .iter()
            .map(|(label, link)| vec![json!({ "text": label, "url": link })])
            .collect();
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": message.text,
            "disable_web_page_preview": true,
        });
        if !keyboard.is_empty() {
            body["reply_markup"] = json!({ "inline_keyboard": keyboard });
        }

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Channel {
                channel: "telegram".to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(DispatchError::Channel {
                channel: "telegram".to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }
}

pub fn build_notifiers(channels: &[ChannelConfig]) -> Vec<Arc<dyn Notifier>> {
    channels
        .iter()
        .map(|channel| match channel {
            ChannelConfig::Telegram { bot_token, chat_id } => Arc::new(TelegramNotifier::new(
                bot_token.clone(),
                chat_id.clone(),
            )) as Arc<dyn Notifier>,
        })
        .collect()
}

//================================================================================================//
//                                   IN-MEMORY STORE                                              //
//================================================================================================//

/// Reference implementation of the persistence contract; the production
/// backend lives outside this crate.
#[derive(Default)]
pub struct InMemoryAlertStore {
    records: RwLock<Vec<AlertRecord>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<AlertRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn record(&self, record: &AlertRecord) -> Result<(), DispatchError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}

//================================================================================================//
//                                      DISPATCHER                                                //
//================================================================================================//

pub struct Dispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
    store: Arc<dyn AlertStore>,
}

impl Dispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>, store: Arc<dyn AlertStore>) -> Self {
        Self { notifiers, store }
    }

    /// Fans the alert out to every channel independently and persists the
    /// record with per-channel delivery status.
    pub async fn dispatch(&self, passed: &PassedCandidate, token: &TokenMeta) {
        let message = format_alert(passed, token);
        let mut deliveries = Vec::with_capacity(self.notifiers.len());

        for notifier in &self.notifiers {
            match notifier.send(&message).await {
                Ok(()) => {
                    info!(
                        target: "dispatch",
                        channel = notifier.channel_name(),
                        token = %token.symbol,
                        "Alert delivered"
                    );
                    deliveries.push(DeliveryStatus {
                        channel: notifier.channel_name().to_string(),
                        delivered: true,
                        detail: None,
                    });
                }
                Err(e) => {
                    warn!(
                        target: "dispatch",
                        channel = notifier.channel_name(),
                        token = %token.symbol,
                        error = %e,
                        "Alert delivery failed"
                    );
                    deliveries.push(DeliveryStatus {
                        channel: notifier.channel_name().to_string(),
                        delivered: false,
                        detail: Some(e.to_string()),
                    });
                }
            }
        }

        let record = AlertRecord {
            token: passed.candidate.token,
            symbol: token.symbol.clone(),
            name: token.name.clone(),
            reasons: passed.candidate.reasons.clone(),
            snapshot: Some(passed.snapshot.clone()),
            deliveries,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.record(&record).await {
            error!(
                target: "dispatch",
                token = %token.symbol,
                error = %e,
                "Alert record write failed"
            );
        }
    }
}

fn format_alert(passed: &PassedCandidate, token: &TokenMeta) -> AlertMessage {
    let candidate = &passed.candidate;
    let mut text = format!(
        "🐋 Buy pressure on {} ({})\n\
         Block {}: {} buys, largest ${:.0}, total ${:.0}\n",
        token.symbol, token.name, candidate.block_number, candidate.buy_count,
        candidate.max_single_usd, candidate.block_total_usd,
    );
    for reason in &candidate.reasons {
        text.push_str(&format!("• {reason}\n"));
    }
    text.push_str(&format!("{:?}", candidate.token));

    let buttons = vec![(
        "Chart".to_string(),
        format!("https://dexscreener.com/bsc/{:?}", candidate.token),
    )];
    AlertMessage { text, buttons }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertCandidate, MarketSnapshot};
    use ethers::types::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyNotifier {
        name: &'static str,
        fail: bool,
        sends: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        fn channel_name(&self) -> &str {
            self.name
        }

        async fn send(&self, _message: &AlertMessage) -> Result<(), DispatchError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DispatchError::Channel {
                    channel: self.name.to_string(),
                    reason: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct FailingStore;

    #[async_trait]
    impl AlertStore for FailingStore {
        async fn record(&self, _record: &AlertRecord) -> Result<(), DispatchError> {
            Err(DispatchError::Store("disk full".to_string()))
        }
    }

    fn passed() -> PassedCandidate {
        PassedCandidate {
            candidate: AlertCandidate {
                token: Address::from_low_u64_be(3),
                block_number: 100,
                max_single_usd: 600.0,
                block_total_usd: 1010.0,
                buy_count: 4,
                reasons: vec!["1h price change +12.0% (min +5.0%)".to_string()],
                created_at: Utc::now(),
            },
            snapshot: MarketSnapshot::default(),
        }
    }

    fn token() -> TokenMeta {
        TokenMeta {
            address: Address::from_low_u64_be(3),
            decimals: 18,
            symbol: "MEME".to_string(),
            name: "Meme Token".to_string(),
        }
    }

    #[tokio::test]
    async fn one_channel_failure_does_not_affect_others() {
        let ok = Arc::new(FlakyNotifier {
            name: "ok",
            fail: false,
            sends: AtomicUsize::new(0),
        });
        let bad = Arc::new(FlakyNotifier {
            name: "bad",
            fail: true,
            sends: AtomicUsize::new(0),
        });
        let store = Arc::new(InMemoryAlertStore::new());
        let dispatcher = Dispatcher::new(
            vec![bad.clone() as Arc<dyn Notifier>, ok.clone() as Arc<dyn Notifier>],
            store.clone(),
        );

        dispatcher.dispatch(&passed(), &token()).await;

        assert_eq!(ok.sends.load(Ordering::SeqCst), 1);
        assert_eq!(bad.sends.load(Ordering::SeqCst), 1);

        let records = store.all().await;
        assert_eq!(records.len(), 1);
        let statuses = &records[0].deliveries;
        assert_eq!(statuses.len(), 2);
        assert!(!statuses[0].delivered);
        assert!(statuses[1].delivered);
        assert_eq!(statuses[0].detail.as_deref().map(|d| d.contains("boom")), Some(true));
    }

    #[tokio::test]
    async fn record_failure_does_not_suppress_notifications() {
        let ok = Arc::new(FlakyNotifier {
            name: "ok",
            fail: false,
            sends: AtomicUsize::new(0),
        });
        let dispatcher =
            Dispatcher::new(vec![ok.clone() as Arc<dyn Notifier>], Arc::new(FailingStore));
        dispatcher.dispatch(&passed(), &token()).await;
        assert_eq!(ok.sends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn alert_text_carries_evidence_and_reasons() {
        let message = format_alert(&passed(), &token());
        assert!(message.text.contains("MEME"));
        assert!(message.text.contains("$600"));
        assert!(message.text.contains("price change"));
        assert_eq!(message.buttons.len(), 1);
    }
}
