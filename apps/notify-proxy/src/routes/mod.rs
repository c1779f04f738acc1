pub mod alerts;
pub mod health;
pub mod users;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(alerts::router())
        .merge(users::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
