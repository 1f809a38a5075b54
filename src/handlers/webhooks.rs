//! Generic webhook intake shared by every provider adapter.
//!
//! Signature and parse failures return 400 before anything is written, so
//! forged or malformed deliveries leave no trace. Once the event is
//! verified it is claimed through the webhook_records unique constraint;
//! a settled duplicate short-circuits to 200 with the prior outcome.
//! Dispatch failures settle the record as failed and return 500 when
//! retryable, so the provider redelivers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, Result};
use crate::events::Event;
use crate::models::{PaymentEventType, WebhookStatus};

pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let adapter = state
        .providers
        .get(&provider)
        .ok_or_else(|| AppError::BadRequest(msg::UNKNOWN_PROVIDER.into()))?;

    let secret = state
        .webhook_secrets
        .get(adapter.name())
        .ok_or_else(|| {
            AppError::Internal(format!("no webhook secret configured for {provider}"))
        })?;

    let signature = headers
        .get(adapter.signature_header())
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest(msg::MISSING_SIGNATURE.into()))?;

    if !adapter.verify_signature(&body, signature, secret)? {
        return Err(AppError::InvalidSignature);
    }

    let payment = adapter.parse_event(&body)?;

    if payment.event_type == PaymentEventType::Unknown {
        tracing::debug!(provider = %provider, event_id = %payment.event_id, "ignoring event type");
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response());
    }

    let event_id = payment.event_id.clone();
    {
        let conn = state.db.get()?;
        match queries::claim_webhook_record(&conn, adapter.name(), &event_id)? {
            queries::WebhookClaim::Claimed => {}
            queries::WebhookClaim::AlreadySettled(status) => {
                tracing::info!(
                    provider = %provider,
                    event_id = %event_id,
                    status = %status,
                    "duplicate webhook delivery"
                );
                return Ok((
                    StatusCode::OK,
                    Json(json!({ "status": status.as_str(), "duplicate": true })),
                )
                    .into_response());
            }
        }
    }

    let result = state.dispatcher.dispatch(&Event::from_payment(payment));

    let conn = state.db.get()?;
    if result.success {
        let skipped = result
            .data
            .get("skipped")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let status = if skipped {
            WebhookStatus::Skipped
        } else {
            WebhookStatus::Processed
        };
        queries::settle_webhook_record(&conn, adapter.name(), &event_id, status, None)?;
        return Ok((
            StatusCode::OK,
            Json(json!({ "status": status.as_str(), "result": result.data })),
        )
            .into_response());
    }

    let errors = result.errors.join("; ");
    queries::settle_webhook_record(
        &conn,
        adapter.name(),
        &event_id,
        WebhookStatus::Failed,
        Some(&errors),
    )?;
    tracing::error!(
        provider = %provider,
        event_id = %event_id,
        retryable = result.retryable,
        "webhook processing failed: {errors}"
    );

    // A retryable failure gets a 500 so the provider redelivers; a fatal
    // one gets a 200 so it stops.
    let code = if result.retryable {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((
        code,
        Json(json!({ "status": "failed", "errors": result.errors })),
    )
        .into_response())
}
