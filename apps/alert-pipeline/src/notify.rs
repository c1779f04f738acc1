//! Outbound notification delivery.
//!
//! A [`Dispatcher`] renders one message per alert and hands it to every
//! configured channel concurrently. Each attempt ends in a [`DeliveryOutcome`];
//! a failing channel never stops the others and nothing is retried.

mod message;
mod telegram;
mod whatsapp;

pub use message::{format_message, AlertMode};
pub use telegram::TelegramNotifier;
pub use whatsapp::{contains_quota_marker, WhatsAppNotifier};

use crate::ingest::LatestReadings;
use crate::thresholds::Violation;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Telegram,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::WhatsApp => f.write_str("whatsapp"),
            ChannelKind::Telegram => f.write_str("telegram"),
        }
    }
}

/// Credentials and recipient for one delivery channel.
#[derive(Clone, PartialEq, Eq)]
pub enum ChannelConfig {
    WhatsApp {
        phone: String,
        api_key: Option<String>,
    },
    Telegram {
        bot_token: String,
        chat_id: String,
    },
}

impl ChannelConfig {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelConfig::WhatsApp { .. } => ChannelKind::WhatsApp,
            ChannelConfig::Telegram { .. } => ChannelKind::Telegram,
        }
    }
}

// Keeps tokens and API keys out of logs.
impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelConfig::WhatsApp { phone, api_key } => f
                .debug_struct("WhatsApp")
                .field("phone", phone)
                .field("api_key", &api_key.as_ref().map(|_| "<redacted>"))
                .finish(),
            ChannelConfig::Telegram { chat_id, .. } => f
                .debug_struct("Telegram")
                .field("bot_token", &"<redacted>")
                .field("chat_id", chat_id)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    QuotaExceeded,
    DeliveryFailed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub channel: ChannelKind,
    pub outcome: DeliveryOutcome,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("provider rejected the message: {0}")]
    Rejected(String),
    #[error("{0} transport cannot deliver to a {1} channel")]
    ChannelMismatch(ChannelKind, ChannelKind),
}

/// A transport able to deliver one rendered message to one channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Sends `message`. `Ok` carries `Delivered` or `QuotaExceeded`; every
    /// transport problem is an `Err`.
    async fn deliver(
        &self,
        message: &str,
        channel: &ChannelConfig,
    ) -> Result<DeliveryOutcome, DeliveryError>;
}

pub struct Dispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>, timeout: Duration) -> Self {
        Self { notifiers, timeout }
    }

    /// Both transports, talking to the notify proxy at `proxy_base_url`.
    pub fn via_proxy(
        client: reqwest::Client,
        proxy_base_url: &str,
        timeout: Duration,
    ) -> Self {
        let notifiers: Vec<Arc<dyn Notifier>> = vec![
            Arc::new(WhatsAppNotifier::new(client.clone(), proxy_base_url)),
            Arc::new(TelegramNotifier::new(client, proxy_base_url)),
        ];
        Self::new(notifiers, timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn dispatch(
        &self,
        mode: AlertMode,
        violations: &[Violation],
        latest: &LatestReadings,
        channels: &[ChannelConfig],
        now: DateTime<Utc>,
    ) -> Vec<DeliveryReport> {
        let message = format_message(mode, violations, latest, &now.with_timezone(&Local));
        self.send(&message, channels, now).await
    }

    /// Attempts every channel concurrently; reports come back in channel order.
    pub async fn send(
        &self,
        message: &str,
        channels: &[ChannelConfig],
        now: DateTime<Utc>,
    ) -> Vec<DeliveryReport> {
        let attempts = channels.iter().map(|channel| async move {
            let outcome = self.attempt(message, channel).await;
            match &outcome {
                DeliveryOutcome::Delivered => {
                    tracing::info!(channel = %channel.kind(), "alert delivered")
                }
                DeliveryOutcome::QuotaExceeded => {
                    tracing::warn!(channel = %channel.kind(), "provider quota exhausted")
                }
                DeliveryOutcome::DeliveryFailed { reason } => {
                    tracing::warn!(
                        channel = %channel.kind(),
                        reason = %reason,
                        "alert delivery failed"
                    )
                }
            }
            DeliveryReport {
                channel: channel.kind(),
                outcome,
                attempted_at: now,
            }
        });
        join_all(attempts).await
    }

    async fn attempt(&self, message: &str, channel: &ChannelConfig) -> DeliveryOutcome {
        let kind = channel.kind();
        let Some(notifier) = self.notifiers.iter().find(|n| n.kind() == kind) else {
            return DeliveryOutcome::DeliveryFailed {
                reason: format!("no transport registered for {kind}"),
            };
        };

        match tokio::time::timeout(self.timeout, notifier.deliver(message, channel)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => DeliveryOutcome::DeliveryFailed {
                reason: err.to_string(),
            },
            Err(_) => DeliveryOutcome::DeliveryFailed {
                reason: format!("timed out after {}s", self.timeout.as_secs_f64()),
            },
        }
    }
}
