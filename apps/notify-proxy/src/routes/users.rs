use anyhow::Context;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub uid: String,
    pub email: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

/// One account from the auth provider's export. Accepts both the export's
/// field names and the SDK's.
#[derive(Debug, Deserialize)]
struct DirectoryUser {
    #[serde(alias = "localId")]
    uid: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, rename = "displayName")]
    display_name: Option<String>,
    #[serde(default, rename = "photoURL", alias = "photoUrl")]
    photo_url: Option<String>,
    #[serde(default, rename = "createdAt", alias = "creationTime")]
    created_at: Option<CreatedAt>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreatedAt {
    Millis(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Directory {
    Wrapped { users: Vec<DirectoryUser> },
    List(Vec<DirectoryUser>),
}

impl CreatedAt {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            CreatedAt::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            CreatedAt::Text(raw) => {
                let raw = raw.trim();
                if let Ok(ms) = raw.parse::<i64>() {
                    return Utc.timestamp_millis_opt(ms).single();
                }
                DateTime::parse_from_rfc3339(raw)
                    .or_else(|_| DateTime::parse_from_rfc2822(raw))
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<DirectoryUser> for UserRecord {
    fn from(user: DirectoryUser) -> Self {
        let created_at = user
            .created_at
            .as_ref()
            .and_then(CreatedAt::to_datetime)
            .map(|dt| dt.format("%-m/%-d/%Y").to_string())
            .unwrap_or_default();
        Self {
            uid: user.uid,
            email: user.email,
            display_name: non_empty(user.display_name).unwrap_or_else(|| "N/A".to_string()),
            photo_url: non_empty(user.photo_url).unwrap_or_default(),
            created_at,
        }
    }
}

pub async fn load_users(path: &Path) -> anyhow::Result<Vec<UserRecord>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read user directory {}", path.display()))?;
    let directory: Directory = serde_json::from_slice(&bytes)
        .with_context(|| format!("user directory {} is malformed", path.display()))?;
    let users = match directory {
        Directory::Wrapped { users } | Directory::List(users) => users,
    };
    Ok(users.into_iter().map(UserRecord::from).collect())
}

pub(crate) async fn list_users(State(state): State<AppState>) -> AppResult<Json<Vec<UserRecord>>> {
    let users = load_users(&state.config.user_directory_path)
        .await
        .map_err(|err| {
            let message = format!("{err:#}");
            tracing::error!(error = %message, "failed to list users");
            AppError::internal(message)
        })?;
    Ok(Json(users))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/users", get(list_users))
}
