use crate::ingest::{LatestReadings, Sample};
use crate::pipeline::{AlertRecord, PipelineHandle};
use crate::settings::{SettingsError, SettingsStore, TelegramSettings};
use crate::thresholds::ThresholdConfig;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct HttpState {
    pub pipeline: PipelineHandle,
    pub settings: Arc<dyn SettingsStore>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
struct ManualAlertResponse {
    success: bool,
    alert: AlertRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    success: bool,
    last_dispatch_at: Option<DateTime<Utc>>,
    alerts: Vec<AlertRecord>,
}

fn unavailable(err: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
}

fn settings_error(err: SettingsError) -> (StatusCode, String) {
    match err {
        SettingsError::InvalidBounds(_) | SettingsError::InvalidInterval => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        other => {
            tracing::error!(error = %other, "failed to persist settings");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to persist settings".to_string(),
            )
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_latest(State(state): State<HttpState>) -> ApiResult<LatestReadings> {
    let latest = state.pipeline.latest().await.map_err(unavailable)?;
    Ok(Json(latest))
}

async fn get_samples(State(state): State<HttpState>) -> ApiResult<Vec<Sample>> {
    let samples = state.pipeline.samples().await.map_err(unavailable)?;
    Ok(Json(samples))
}

async fn get_thresholds(State(state): State<HttpState>) -> Json<ThresholdConfig> {
    Json(state.settings.thresholds().await)
}

async fn put_thresholds(
    State(state): State<HttpState>,
    Json(config): Json<ThresholdConfig>,
) -> ApiResult<ThresholdConfig> {
    state
        .settings
        .update_thresholds(config)
        .await
        .map_err(settings_error)?;
    Ok(Json(config))
}

async fn put_telegram(
    State(state): State<HttpState>,
    Json(creds): Json<TelegramSettings>,
) -> ApiResult<SuccessResponse> {
    state
        .settings
        .update_telegram(creds)
        .await
        .map_err(settings_error)?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn post_manual_alert(State(state): State<HttpState>) -> ApiResult<ManualAlertResponse> {
    let alert = state.pipeline.manual_alert().await.map_err(unavailable)?;
    let success = alert.reports.iter().any(|r| r.outcome.is_delivered());
    Ok(Json(ManualAlertResponse { success, alert }))
}

async fn get_history(State(state): State<HttpState>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        success: true,
        last_dispatch_at: state.pipeline.last_dispatch_at(),
        alerts: state.pipeline.history(),
    })
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/latest", get(get_latest))
        .route("/v1/samples", get(get_samples))
        .route(
            "/v1/settings/thresholds",
            get(get_thresholds).put(put_thresholds),
        )
        .route("/v1/settings/telegram", put(put_telegram))
        .route("/v1/alerts/manual", post(post_manual_alert))
        .route("/v1/alerts/history", get(get_history))
        .with_state(state)
}
