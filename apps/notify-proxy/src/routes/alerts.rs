use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{upstream_error, AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendAlertQuery {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub apikey: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendAlertResponse {
    pub success: bool,
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTelegramRequest {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendTelegramResponse {
    pub success: bool,
    pub result: Value,
}

fn required(value: Option<&str>, name: &str) -> AppResult<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request(format!("{name} is required")))
}

/// Accepts `+15550001111` or `15550001111`; returns the digits only.
fn normalize_phone(raw: &str) -> AppResult<String> {
    let digits = raw.trim().trim_start_matches('+');
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::bad_request(
            "phone must contain digits only, with an optional leading +",
        ));
    }
    Ok(digits.to_string())
}

/// Telegram accepts numeric ids and `@channel` names.
fn chat_id_param(value: Option<&Value>) -> AppResult<String> {
    match value {
        Some(Value::String(raw)) if !raw.trim().is_empty() => Ok(raw.trim().to_string()),
        Some(Value::Number(num)) => Ok(num.to_string()),
        _ => Err(AppError::bad_request("chatId is required")),
    }
}

pub(crate) async fn send_alert(
    State(state): State<AppState>,
    Query(query): Query<SendAlertQuery>,
) -> AppResult<Json<SendAlertResponse>> {
    let phone = normalize_phone(&required(query.phone.as_deref(), "phone")?)?;
    let message = required(query.message.as_deref(), "message")?;
    let apikey = query
        .apikey
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| state.config.callmebot_api_key.clone())
        .ok_or_else(|| AppError::bad_request("apikey is required; none is configured"))?;

    let phone_param = format!("+{phone}");
    let response = state
        .http
        .get(&state.config.callmebot_url)
        .query(&[
            ("phone", phone_param.as_str()),
            ("text", message.as_str()),
            ("apikey", apikey.as_str()),
        ])
        .send()
        .await
        .map_err(|err| upstream_error("WhatsApp gateway", err))?;

    let status = response.status();
    let data = response
        .text()
        .await
        .map_err(|err| upstream_error("WhatsApp gateway", err))?;
    if !status.is_success() {
        return Err(upstream_error(
            "WhatsApp gateway",
            format!("status {status}: {data}"),
        ));
    }

    tracing::info!(phone = %phone, "whatsapp alert forwarded");
    Ok(Json(SendAlertResponse {
        success: true,
        data,
    }))
}

pub(crate) async fn send_telegram_alert(
    State(state): State<AppState>,
    Json(body): Json<SendTelegramRequest>,
) -> AppResult<Json<SendTelegramResponse>> {
    let chat_id = chat_id_param(body.chat_id.as_ref())?;
    let message = required(body.message.as_deref(), "message")?;
    let bot_token = body
        .bot_token
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| state.config.telegram_bot_token.clone())
        .ok_or_else(|| AppError::bad_request("botToken is required; none is configured"))?;

    let url = format!(
        "{}/bot{}/sendMessage",
        state.config.telegram_api_base.trim_end_matches('/'),
        bot_token
    );
    let response = state
        .http
        .post(&url)
        .json(&serde_json::json!({ "chat_id": chat_id, "text": message }))
        .send()
        .await
        .map_err(|err| upstream_error("Telegram", err.without_url()))?;

    let status = response.status();
    let result: Value = response
        .json()
        .await
        .map_err(|err| upstream_error("Telegram", err.without_url()))?;
    if !status.is_success() {
        let description = result
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(upstream_error(
            "Telegram",
            format!("status {status}: {description}"),
        ));
    }

    tracing::info!(chat_id = %chat_id, "telegram alert forwarded");
    Ok(Json(SendTelegramResponse {
        success: true,
        result,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/send-alert", get(send_alert))
        .route("/send-telegram-alert", post(send_telegram_alert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::routes;
    use crate::test_support::{call, serve_stub, test_state};
    use axum::body::Body;
    use axum::extract::Path;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use std::collections::HashMap;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn callmebot_stub() -> String {
        let router = Router::new().route(
            "/whatsapp.php",
            axum::routing::get(|Query(params): Query<HashMap<String, String>>| async move {
                format!(
                    "Message to {} queued ({}) key={}",
                    params.get("phone").cloned().unwrap_or_default(),
                    params.get("text").cloned().unwrap_or_default(),
                    params.get("apikey").cloned().unwrap_or_default(),
                )
            }),
        );
        format!("{}/whatsapp.php", serve_stub(router).await)
    }

    async fn telegram_stub() -> String {
        let router = Router::new().route(
            "/{bot}/sendMessage",
            axum::routing::post(|Path(bot): Path<String>, Json(body): Json<Value>| async move {
                if bot != "bot123:abc" {
                    return (
                        StatusCode::UNAUTHORIZED,
                        Json(json!({ "ok": false, "description": "Unauthorized" })),
                    );
                }
                (
                    StatusCode::OK,
                    Json(json!({
                        "ok": true,
                        "result": { "chat": { "id": body["chat_id"] }, "text": body["text"] }
                    })),
                )
            }),
        );
        serve_stub(router).await
    }

    #[tokio::test]
    async fn send_alert_forwards_to_gateway_with_configured_key() {
        let config = ProxyConfig {
            callmebot_url: callmebot_stub().await,
            callmebot_api_key: Some("2570".into()),
            ..ProxyConfig::default()
        };
        let app = routes::router(test_state(config));

        let (status, body) = call(
            app,
            get("/send-alert?phone=%2B15550001111&message=pH%20high"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], "Message to +15550001111 queued (pH high) key=2570");
    }

    #[tokio::test]
    async fn query_apikey_overrides_configured_one() {
        let config = ProxyConfig {
            callmebot_url: callmebot_stub().await,
            callmebot_api_key: Some("2570".into()),
            ..ProxyConfig::default()
        };
        let app = routes::router(test_state(config));

        let (_, body) = call(app, get("/send-alert?phone=1555&message=hi&apikey=override")).await;
        assert!(body["data"].as_str().unwrap().ends_with("key=override"));
    }

    #[tokio::test]
    async fn send_alert_validates_input() {
        let app = routes::router(test_state(ProxyConfig {
            callmebot_api_key: Some("k".into()),
            ..ProxyConfig::default()
        }));

        for uri in [
            "/send-alert?message=hi",
            "/send-alert?phone=1555",
            "/send-alert?phone=15-55&message=hi",
            "/send-alert?phone=%2B&message=hi",
        ] {
            let (status, body) = call(app.clone(), get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["success"], false);
        }
    }

    #[tokio::test]
    async fn send_alert_without_any_key_is_rejected() {
        let app = routes::router(test_state(ProxyConfig::default()));
        let (status, _) = call(app, get("/send-alert?phone=1555&message=hi")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unreachable_gateway_is_bad_gateway() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let app = routes::router(test_state(ProxyConfig {
            callmebot_url: format!("http://{addr}/whatsapp.php"),
            callmebot_api_key: Some("k".into()),
            ..ProxyConfig::default()
        }));
        let (status, body) = call(app, get("/send-alert?phone=1555&message=hi")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn telegram_alert_uses_fallback_token() {
        let app = routes::router(test_state(ProxyConfig {
            telegram_api_base: telegram_stub().await,
            telegram_bot_token: Some("123:abc".into()),
            ..ProxyConfig::default()
        }));

        let (status, body) = call(
            app,
            post_json("/send-telegram-alert", json!({ "chatId": -10042, "message": "NTU high" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["ok"], true);
        assert_eq!(body["result"]["result"]["chat"]["id"], "-10042");
        assert_eq!(body["result"]["result"]["text"], "NTU high");
    }

    #[tokio::test]
    async fn telegram_rejection_is_bad_gateway() {
        let app = routes::router(test_state(ProxyConfig {
            telegram_api_base: telegram_stub().await,
            ..ProxyConfig::default()
        }));

        let (status, body) = call(
            app,
            post_json(
                "/send-telegram-alert",
                json!({ "botToken": "999:wrong", "chatId": "42", "message": "hi" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn telegram_alert_requires_chat_and_message() {
        let app = routes::router(test_state(ProxyConfig {
            telegram_bot_token: Some("123:abc".into()),
            ..ProxyConfig::default()
        }));

        for body in [json!({ "message": "hi" }), json!({ "chatId": "42" })] {
            let (status, _) = call(app.clone(), post_json("/send-telegram-alert", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }
}
