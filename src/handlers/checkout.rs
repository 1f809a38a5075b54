use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json as ResponseJson;

use crate::checkout::{CheckoutRequest, CheckoutService};
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;

pub async fn handle_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse> {
    let service = CheckoutService::new(state.db.clone(), state.dispatcher.clone());
    let response = service.checkout(&request)?;
    Ok((StatusCode::CREATED, ResponseJson(response)))
}
