pub mod checkout;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/checkout", post(checkout::handle_checkout))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
