use super::{ChannelConfig, ChannelKind, DeliveryError, DeliveryOutcome, Notifier};
use async_trait::async_trait;
use reqwest::Client;

const QUOTA_MARKER: &str = "0 free messages";

/// Delivers through the notify proxy's `GET /send-alert`, which forwards to the
/// WhatsApp gateway.
pub struct WhatsAppNotifier {
    client: Client,
    endpoint: String,
}

impl WhatsAppNotifier {
    pub fn new(client: Client, proxy_base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/send-alert", proxy_base_url.trim_end_matches('/')),
        }
    }
}

/// The gateway answers 200 OK even when the free tier is used up; the only
/// signal is this phrase in the body. `10 free messages` does not match.
pub fn contains_quota_marker(body: &str) -> bool {
    let haystack = body.to_ascii_lowercase();
    let bytes = haystack.as_bytes();
    haystack
        .match_indices(QUOTA_MARKER)
        .any(|(idx, _)| idx == 0 || !bytes[idx - 1].is_ascii_digit())
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    async fn deliver(
        &self,
        message: &str,
        channel: &ChannelConfig,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let ChannelConfig::WhatsApp { phone, api_key } = channel else {
            return Err(DeliveryError::ChannelMismatch(self.kind(), channel.kind()));
        };

        let mut query: Vec<(&str, &str)> = vec![("phone", phone.as_str()), ("message", message)];
        if let Some(key) = api_key.as_deref() {
            query.push(("apikey", key));
        }

        let response = self.client.get(&self.endpoint).query(&query).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(DeliveryError::Status { status, body });
        }
        if contains_quota_marker(&body) {
            return Ok(DeliveryOutcome::QuotaExceeded);
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
            if value.get("success").and_then(|v| v.as_bool()) == Some(false) {
                let error = value
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error");
                return Err(DeliveryError::Rejected(error.to_string()));
            }
        }
        Ok(DeliveryOutcome::Delivered)
    }
}
