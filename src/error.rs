use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Already subscribed: {0}")]
    AlreadySubscribed(String),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors a caller (or a resent webhook) can safely retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ConcurrentModification(_)
                | AppError::Conflict(_)
                | AppError::Database(_)
                | AppError::Pool(_)
        )
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone()))
            }
            AppError::AlreadySubscribed(msg) => {
                (StatusCode::CONFLICT, "Already subscribed", Some(msg.clone()))
            }
            AppError::InsufficientBalance { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Insufficient balance",
                Some(self.to_string()),
            ),
            AppError::ConcurrentModification(msg) => (
                StatusCode::CONFLICT,
                "Concurrent modification",
                Some(msg.clone()),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::InvalidSignature => (StatusCode::BAD_REQUEST, "Invalid signature", None),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Shared error message constants so handlers and tests agree on wording.
pub mod msg {
    pub const PLAN_NOT_FOUND: &str = "Plan not found";
    pub const PLAN_INACTIVE: &str = "Plan is not active";
    pub const BUNDLE_NOT_FOUND: &str = "Token bundle not found";
    pub const ADDON_NOT_FOUND: &str = "Add-on not found";
    pub const INVOICE_NOT_FOUND: &str = "Invoice not found";
    pub const INVOICE_NOT_PENDING: &str = "Invoice is not pending";
    pub const UNKNOWN_PROVIDER: &str = "Unknown provider";
    pub const MISSING_SIGNATURE: &str = "Missing signature header";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
}

/// Extension for turning `Option<T>` into `Result<T>` with a NotFound error.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(msg.to_string()))
    }
}
