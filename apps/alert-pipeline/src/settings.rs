//! Threshold bounds and channel credentials, persisted as one JSON document.

use crate::notify::ChannelConfig;
use crate::thresholds::{ThresholdConfig, ThresholdError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{watch, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid threshold bounds: {0}")]
    InvalidBounds(ThresholdError),
    #[error("alert interval must be at least one minute")]
    InvalidInterval,
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<ThresholdError> for SettingsError {
    fn from(err: ThresholdError) -> Self {
        match err {
            ThresholdError::InvalidInterval => SettingsError::InvalidInterval,
            other => SettingsError::InvalidBounds(other),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhatsAppSettings {
    pub phone: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for WhatsAppSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppSettings")
            .field("phone", &self.phone)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsDocument {
    pub thresholds: ThresholdConfig,
    pub telegram: TelegramSettings,
    pub whatsapp: WhatsAppSettings,
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn thresholds(&self) -> ThresholdConfig;

    /// Validates and persists new bounds; invalid configs never reach disk.
    async fn update_thresholds(&self, config: ThresholdConfig) -> Result<(), SettingsError>;

    async fn telegram(&self) -> TelegramSettings;

    async fn update_telegram(&self, creds: TelegramSettings) -> Result<(), SettingsError>;

    async fn whatsapp(&self) -> WhatsAppSettings;

    /// Receives every threshold change after it is persisted.
    fn watch_thresholds(&self) -> watch::Receiver<ThresholdConfig>;

    async fn channels(&self) -> Vec<ChannelConfig> {
        channels_from_settings(&self.whatsapp().await, &self.telegram().await)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Every channel with complete credentials. Incomplete ones are skipped.
pub fn channels_from_settings(
    whatsapp: &WhatsAppSettings,
    telegram: &TelegramSettings,
) -> Vec<ChannelConfig> {
    let mut channels = Vec::with_capacity(2);

    match non_empty(&whatsapp.phone) {
        Some(phone) => channels.push(ChannelConfig::WhatsApp {
            phone,
            api_key: non_empty(&whatsapp.api_key),
        }),
        None => tracing::info!(channel = "whatsapp", "skipping channel; no phone configured"),
    }

    match (non_empty(&telegram.bot_token), non_empty(&telegram.chat_id)) {
        (Some(bot_token), Some(chat_id)) => {
            channels.push(ChannelConfig::Telegram { bot_token, chat_id })
        }
        _ => tracing::info!(
            channel = "telegram",
            "skipping channel; bot token or chat id missing"
        ),
    }

    channels
}

pub struct FileSettingsStore {
    path: PathBuf,
    document: RwLock<SettingsDocument>,
    thresholds_tx: watch::Sender<ThresholdConfig>,
}

impl FileSettingsStore {
    /// Loads `path`, or starts from defaults when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<SettingsDocument>(&bytes).map_err(|source| {
                SettingsError::Decode {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no settings file; using defaults");
                SettingsDocument::default()
            }
            Err(source) => return Err(SettingsError::Io { path, source }),
        };

        if let Err(err) = document.thresholds.validate() {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "stored thresholds are invalid; evaluating them as written"
            );
        }

        let (thresholds_tx, _) = watch::channel(document.thresholds);
        Ok(Self {
            path,
            document: RwLock::new(document),
            thresholds_tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, document: &SettingsDocument) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let encoded = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encoded).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }

    async fn modify<F>(&self, apply: F) -> Result<SettingsDocument, SettingsError>
    where
        F: FnOnce(&mut SettingsDocument) + Send,
    {
        let mut guard = self.document.write().await;
        let mut next = guard.clone();
        apply(&mut next);
        self.persist(&next).await?;
        // Publish under the write guard so watchers observe updates in the
        // order they were persisted.
        self.thresholds_tx.send_if_modified(|current| {
            let changed = *current != next.thresholds;
            *current = next.thresholds;
            changed
        });
        *guard = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn thresholds(&self) -> ThresholdConfig {
        self.document.read().await.thresholds
    }

    async fn update_thresholds(&self, config: ThresholdConfig) -> Result<(), SettingsError> {
        config.validate()?;
        self.modify(|doc| doc.thresholds = config).await?;
        tracing::info!(
            interval_minutes = config.alert_interval_minutes,
            "threshold settings updated"
        );
        Ok(())
    }

    async fn telegram(&self) -> TelegramSettings {
        self.document.read().await.telegram.clone()
    }

    async fn update_telegram(&self, creds: TelegramSettings) -> Result<(), SettingsError> {
        self.modify(|doc| doc.telegram = creds).await?;
        tracing::info!("telegram credentials updated");
        Ok(())
    }

    async fn whatsapp(&self) -> WhatsAppSettings {
        self.document.read().await.whatsapp.clone()
    }

    fn watch_thresholds(&self) -> watch::Receiver<ThresholdConfig> {
        self.thresholds_tx.subscribe()
    }
}
