use crate::config::ProxyConfig;
use reqwest::Client;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub http: Client,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> reqwest::Result<Self> {
        let http = Client::builder()
            .timeout(config.upstream_timeout())
            .build()?;
        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }
}
