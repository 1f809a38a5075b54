//! Test utilities and fixtures for Subgate integration tests

#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use std::collections::HashMap;
use std::sync::Arc;

pub use subgate::capture::{PaymentCaptureHandler, PaymentFailedHandler};
pub use subgate::checkout::{CheckoutRequest, CheckoutService};
pub use subgate::db::{init_db, queries, AppState, DbPool};
pub use subgate::events::Dispatcher;
pub use subgate::idempotency::IdempotencyStore;
pub use subgate::models::*;
pub use subgate::providers::{MockAdapter, ProviderRegistry};

pub const TEST_WEBHOOK_SECRET: &str = "test_webhook_secret";

/// Create a pooled in-memory test database with schema initialized.
/// Shared-cache URI so every pooled connection sees the same database.
pub fn setup_test_pool() -> DbPool {
    let name = format!("file:testdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
    let manager = SqliteConnectionManager::file(&name).with_flags(
        OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE,
    );
    let pool = Pool::builder().max_size(4).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }
    pool
}

/// Create an AppState for testing with the capture handlers registered,
/// mirroring the wiring in main.
pub fn create_test_app_state() -> AppState {
    let pool = setup_test_pool();
    let idempotency = IdempotencyStore::new(pool.clone());

    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register(Arc::new(PaymentCaptureHandler::new(
        pool.clone(),
        idempotency.clone(),
    )));
    dispatcher.register(Arc::new(PaymentFailedHandler::new(pool.clone())));

    let mut secrets = HashMap::new();
    secrets.insert("mock".to_string(), TEST_WEBHOOK_SECRET.to_string());

    AppState {
        db: pool,
        dispatcher,
        providers: Arc::new(ProviderRegistry::with_defaults()),
        idempotency,
        webhook_secrets: Arc::new(secrets),
    }
}

/// Create a Router with all endpoints wired to the given state.
pub fn test_app(state: AppState) -> Router {
    subgate::handlers::router().with_state(state)
}

/// Seeded catalog fixture: a single-subscription base category, a
/// multi-subscription extras category, a paid and a free plan, one token
/// bundle and one add-on.
pub struct Catalog {
    pub base_category: Category,
    pub extras_category: Category,
    pub free_plan: Plan,
    pub pro_plan: Plan,
    pub extras_plan: Plan,
    pub bundle: TokenBundle,
    pub addon: AddOn,
}

pub fn seed_catalog(conn: &rusqlite::Connection) -> Catalog {
    let base_category =
        queries::create_category(conn, "Base Plan", true).expect("Failed to create base category");
    let extras_category = queries::create_category(conn, "Extras", false)
        .expect("Failed to create extras category");

    let free_plan = queries::create_plan(conn, "Free", 0, "USD", BillingPeriod::Monthly, true)
        .expect("Failed to create free plan");
    let pro_plan = queries::create_plan(conn, "Pro", 2900, "USD", BillingPeriod::Monthly, true)
        .expect("Failed to create pro plan");
    let extras_plan =
        queries::create_plan(conn, "Booster", 500, "USD", BillingPeriod::Monthly, true)
            .expect("Failed to create extras plan");

    queries::link_plan_category(conn, &free_plan.id, &base_category.id).unwrap();
    queries::link_plan_category(conn, &pro_plan.id, &base_category.id).unwrap();
    queries::link_plan_category(conn, &extras_plan.id, &extras_category.id).unwrap();

    let bundle = queries::create_token_bundle(conn, "1000 Tokens", 1000, 1000, "USD")
        .expect("Failed to create token bundle");
    let addon = queries::create_add_on(conn, "Priority Support", 500, "USD")
        .expect("Failed to create add-on");

    Catalog {
        base_category,
        extras_category,
        free_plan,
        pro_plan,
        extras_plan,
        bundle,
        addon,
    }
}

/// Build a mock-provider capture payload for the given invoice.
pub fn mock_capture_payload(
    event_id: &str,
    invoice_number: &str,
    amount_cents: Option<i64>,
) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": event_id,
        "type": "payment.captured",
        "data": {
            "invoice_reference": invoice_number,
            "amount_cents": amount_cents,
            "currency": "USD",
        },
    }))
    .unwrap()
}

pub fn mock_failed_payload(event_id: &str, invoice_number: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": event_id,
        "type": "payment.failed",
        "data": {
            "invoice_reference": invoice_number,
        },
    }))
    .unwrap()
}

/// Signed POST /webhooks/mock request for the payload.
pub fn signed_mock_request(payload: &[u8]) -> Request<Body> {
    let signature = MockAdapter::sign(payload, TEST_WEBHOOK_SECRET);
    Request::builder()
        .method("POST")
        .uri("/webhooks/mock")
        .header("content-type", "application/json")
        .header("x-mock-signature", signature)
        .body(Body::from(payload.to_vec()))
        .unwrap()
}

pub fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("response body should be JSON")
}

/// Run a checkout directly through the service, returning its response.
pub fn run_checkout(
    state: &AppState,
    user_id: &str,
    plan_id: &str,
    bundle_ids: Vec<String>,
    addon_ids: Vec<String>,
) -> subgate::error::Result<subgate::checkout::CheckoutResponse> {
    let service = CheckoutService::new(state.db.clone(), state.dispatcher.clone());
    service.checkout(&CheckoutRequest {
        user_id: user_id.to_string(),
        plan_id: plan_id.to_string(),
        bundle_ids,
        addon_ids,
    })
}

pub fn count_token_transactions(conn: &rusqlite::Connection, user_id: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM token_transactions WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )
    .unwrap()
}
