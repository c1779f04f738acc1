use crate::feed::FeedConfig;
use crate::ingest::DEFAULT_WINDOW;
use crate::notify::DEFAULT_DELIVERY_TIMEOUT;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "./setup/config.json";

fn setup_config_path() -> PathBuf {
    env_value("PIPELINE_SETUP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETUP_CONFIG_PATH))
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_value(key).and_then(|v| v.parse::<T>().ok())
}

/// Values from the shared setup file. Each applies only when the matching
/// environment variable is unset.
#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    mqtt_host: Option<String>,
    #[serde(default)]
    mqtt_port: Option<u16>,
    #[serde(default)]
    mqtt_username: Option<String>,
    #[serde(default)]
    mqtt_password: Option<String>,
    #[serde(default)]
    mqtt_topic_prefix: Option<String>,
    #[serde(default)]
    notify_proxy_url: Option<String>,
    #[serde(default)]
    settings_path: Option<String>,
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "alert-pipeline failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "alert-pipeline failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn apply_setup_overrides(
    config: &mut Config,
    overrides: &SetupConfigOverrides,
    env_is_set: impl Fn(&str) -> bool,
) {
    if !env_is_set("PIPELINE_MQTT_HOST") {
        if let Some(host) = trimmed(overrides.mqtt_host.as_deref()) {
            config.mqtt_host = host;
        }
    }
    if !env_is_set("PIPELINE_MQTT_PORT") {
        if let Some(port) = overrides.mqtt_port.filter(|v| *v != 0) {
            config.mqtt_port = port;
        }
    }
    if !env_is_set("PIPELINE_MQTT_USERNAME") && overrides.mqtt_username.is_some() {
        config.mqtt_username = trimmed(overrides.mqtt_username.as_deref());
    }
    if !env_is_set("PIPELINE_MQTT_PASSWORD") && overrides.mqtt_password.is_some() {
        config.mqtt_password = trimmed(overrides.mqtt_password.as_deref());
    }
    if !env_is_set("PIPELINE_MQTT_TOPIC_PREFIX") {
        if let Some(prefix) = trimmed(overrides.mqtt_topic_prefix.as_deref()) {
            config.mqtt_topic_prefix = prefix;
        }
    }
    if !env_is_set("PIPELINE_NOTIFY_PROXY_URL") {
        if let Some(url) = trimmed(overrides.notify_proxy_url.as_deref()) {
            config.notify_proxy_url = url;
        }
    }
    if !env_is_set("PIPELINE_SETTINGS_PATH") {
        if let Some(path) = trimmed(overrides.settings_path.as_deref()) {
            config.settings_path = PathBuf::from(path);
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_client_id: String,
    pub enable_feed: bool,
    pub settings_path: PathBuf,
    pub notify_proxy_url: String,
    pub delivery_timeout_secs: u64,
    pub window_size: usize,
    pub history_limit: usize,
    pub http_addr: SocketAddr,
    pub otlp_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_topic_prefix: "water".to_string(),
            mqtt_keepalive_secs: 30,
            mqtt_client_id: format!("alert-pipeline-{}", std::process::id()),
            enable_feed: true,
            settings_path: PathBuf::from("./data/settings.json"),
            notify_proxy_url: "http://127.0.0.1:3000".to_string(),
            delivery_timeout_secs: DEFAULT_DELIVERY_TIMEOUT.as_secs(),
            window_size: DEFAULT_WINDOW,
            history_limit: 50,
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8090)),
            otlp_endpoint: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let defaults = Self::default();
        let http_addr = match env_value("PIPELINE_HTTP_ADDR") {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .with_context(|| format!("PIPELINE_HTTP_ADDR is not a socket address: {raw}"))?,
            None => defaults.http_addr,
        };

        let mut config = Self {
            mqtt_host: env_value("PIPELINE_MQTT_HOST").unwrap_or(defaults.mqtt_host),
            mqtt_port: env_parse("PIPELINE_MQTT_PORT").unwrap_or(defaults.mqtt_port),
            mqtt_username: env_value("PIPELINE_MQTT_USERNAME"),
            mqtt_password: env_value("PIPELINE_MQTT_PASSWORD"),
            mqtt_topic_prefix: env_value("PIPELINE_MQTT_TOPIC_PREFIX")
                .unwrap_or(defaults.mqtt_topic_prefix),
            mqtt_keepalive_secs: env_parse("PIPELINE_MQTT_KEEPALIVE_SECS")
                .unwrap_or(defaults.mqtt_keepalive_secs),
            mqtt_client_id: env_value("PIPELINE_MQTT_CLIENT_ID")
                .unwrap_or(defaults.mqtt_client_id),
            enable_feed: env_value("PIPELINE_ENABLE_MQTT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.enable_feed),
            settings_path: env_value("PIPELINE_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_path),
            notify_proxy_url: env_value("PIPELINE_NOTIFY_PROXY_URL")
                .unwrap_or(defaults.notify_proxy_url),
            delivery_timeout_secs: env_parse("PIPELINE_DELIVERY_TIMEOUT_SECS")
                .filter(|v: &u64| *v != 0)
                .unwrap_or(defaults.delivery_timeout_secs),
            window_size: env_parse("PIPELINE_WINDOW_SIZE")
                .filter(|v: &usize| *v != 0)
                .unwrap_or(defaults.window_size),
            history_limit: env_parse("PIPELINE_HISTORY_LIMIT")
                .filter(|v: &usize| *v != 0)
                .unwrap_or(defaults.history_limit),
            http_addr,
            otlp_endpoint: env_value("OTEL_EXPORTER_OTLP_ENDPOINT"),
        };

        if let Some(overrides) = load_setup_config_overrides(&setup_config_path()) {
            apply_setup_overrides(&mut config, &overrides, |key| env_value(key).is_some());
        }

        Ok(config)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn feed(&self) -> FeedConfig {
        FeedConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            topic_prefix: self.mqtt_topic_prefix.clone(),
            keepalive: Duration::from_secs(self.mqtt_keepalive_secs),
        }
    }
}
