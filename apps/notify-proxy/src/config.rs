use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CALLMEBOT_URL: &str = "https://api.callmebot.com/whatsapp.php";
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct ProxyConfig {
    pub callmebot_url: String,
    pub callmebot_api_key: Option<String>,
    pub telegram_api_base: String,
    pub telegram_bot_token: Option<String>,
    pub user_directory_path: PathBuf,
    pub upstream_timeout_secs: u64,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("callmebot_url", &self.callmebot_url)
            .field("callmebot_api_key", &self.callmebot_api_key.as_ref().map(|_| "<redacted>"))
            .field("telegram_api_base", &self.telegram_api_base)
            .field("telegram_bot_token", &self.telegram_bot_token.as_ref().map(|_| "<redacted>"))
            .field("user_directory_path", &self.user_directory_path)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .finish()
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            callmebot_url: DEFAULT_CALLMEBOT_URL.to_string(),
            callmebot_api_key: None,
            telegram_api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            telegram_bot_token: None,
            user_directory_path: PathBuf::from("./data/users.json"),
            upstream_timeout_secs: 10,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let upstream_timeout_secs = match env_value("PROXY_UPSTREAM_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|v| *v != 0)
                .with_context(|| {
                    format!("PROXY_UPSTREAM_TIMEOUT_SECS must be a positive integer, got {raw}")
                })?,
            None => defaults.upstream_timeout_secs,
        };

        Ok(Self {
            callmebot_url: env_value("PROXY_CALLMEBOT_URL").unwrap_or(defaults.callmebot_url),
            callmebot_api_key: env_value("PROXY_CALLMEBOT_API_KEY"),
            telegram_api_base: env_value("PROXY_TELEGRAM_API_BASE")
                .unwrap_or(defaults.telegram_api_base),
            telegram_bot_token: env_value("PROXY_TELEGRAM_BOT_TOKEN"),
            user_directory_path: env_value("PROXY_USER_DIRECTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.user_directory_path),
            upstream_timeout_secs,
        })
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}
