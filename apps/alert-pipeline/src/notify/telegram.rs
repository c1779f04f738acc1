use super::{ChannelConfig, ChannelKind, DeliveryError, DeliveryOutcome, Notifier};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

/// Delivers through the notify proxy's `POST /send-telegram-alert`.
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
}

impl TelegramNotifier {
    pub fn new(client: Client, proxy_base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!(
                "{}/send-telegram-alert",
                proxy_base_url.trim_end_matches('/')
            ),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendTelegramRequest<'a> {
    bot_token: &'a str,
    chat_id: &'a str,
    message: &'a str,
}

fn rejection_reason(body: &Value) -> String {
    body.pointer("/result/description")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("provider did not confirm delivery")
        .to_string()
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn deliver(
        &self,
        message: &str,
        channel: &ChannelConfig,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let ChannelConfig::Telegram { bot_token, chat_id } = channel else {
            return Err(DeliveryError::ChannelMismatch(self.kind(), channel.kind()));
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&SendTelegramRequest {
                bot_token,
                chat_id,
                message,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status { status, body });
        }

        let body: Value = response.json().await?;
        let proxied = body.get("success").and_then(Value::as_bool) == Some(true);
        let confirmed = body.pointer("/result/ok").and_then(Value::as_bool) == Some(true);
        if proxied && confirmed {
            Ok(DeliveryOutcome::Delivered)
        } else {
            Err(DeliveryError::Rejected(rejection_reason(&body)))
        }
    }
}
