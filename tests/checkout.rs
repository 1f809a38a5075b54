//! Checkout flow tests: pending record creation, zero-price activation,
//! category enforcement, and validation failures.

mod common;

use axum::http::StatusCode;
use common::*;
use subgate::error::AppError;
use tower::ServiceExt;

#[test]
fn paid_checkout_creates_pending_records() {
    let state = create_test_app_state();
    let catalog = {
        let conn = state.db.get().unwrap();
        seed_catalog(&conn)
    };

    let response = run_checkout(
        &state,
        "user_1",
        &catalog.pro_plan.id,
        vec![catalog.bundle.id.clone()],
        vec![catalog.addon.id.clone()],
    )
    .expect("checkout should succeed");

    assert_eq!(response.subscription.status, SubscriptionStatus::Pending);
    assert!(response.subscription.started_at.is_none());
    assert_eq!(response.invoice.status, InvoiceStatus::Pending);
    // 2900 plan + 1000 bundle + 500 add-on
    assert_eq!(response.invoice.total_cents, 4400);
    assert_eq!(response.line_items.len(), 3);
    assert!(response.invoice.invoice_number.starts_with("INV-"));

    // Nothing activated yet: no tokens credited
    let conn = state.db.get().unwrap();
    assert_eq!(count_token_transactions(&conn, "user_1"), 0);
    assert!(queries::get_token_balance(&conn, "user_1").unwrap().is_none());
}

#[tokio::test]
async fn zero_price_checkout_activates_immediately() {
    let state = create_test_app_state();
    let catalog = {
        let conn = state.db.get().unwrap();
        seed_catalog(&conn)
    };
    let app = test_app(state.clone());

    let response = app
        .oneshot(json_request(
            "/checkout",
            serde_json::json!({
                "user_id": "user_free",
                "plan_id": catalog.free_plan.id,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["subscription"]["status"], "active");
    assert_eq!(body["invoice"]["status"], "paid");
    assert_eq!(body["invoice"]["total_cents"], 0);
    assert!(body["subscription"]["expires_at"].is_i64());
}

#[test]
fn single_category_rejects_second_subscription() {
    let state = create_test_app_state();
    let catalog = {
        let conn = state.db.get().unwrap();
        seed_catalog(&conn)
    };

    // Free plan activates synchronously, so the category is now held.
    run_checkout(&state, "user_2", &catalog.free_plan.id, vec![], vec![]).unwrap();

    let err = run_checkout(&state, "user_2", &catalog.pro_plan.id, vec![], vec![]).unwrap_err();
    assert!(matches!(err, AppError::AlreadySubscribed(_)));

    // A different user is unaffected
    run_checkout(&state, "user_3", &catalog.pro_plan.id, vec![], vec![]).unwrap();
}

#[test]
fn multi_category_allows_parallel_subscriptions() {
    let state = create_test_app_state();
    let catalog = {
        let conn = state.db.get().unwrap();
        seed_catalog(&conn)
    };

    run_checkout(&state, "user_4", &catalog.extras_plan.id, vec![], vec![]).unwrap();
    run_checkout(&state, "user_4", &catalog.extras_plan.id, vec![], vec![])
        .expect("non-single category should allow a second subscription");
}

#[test]
fn unknown_plan_is_rejected() {
    let state = create_test_app_state();
    {
        let conn = state.db.get().unwrap();
        seed_catalog(&conn);
    }

    let err = run_checkout(&state, "user_5", "no-such-plan", vec![], vec![]).unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[test]
fn inactive_plan_is_rejected() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();
    seed_catalog(&conn);
    let retired =
        queries::create_plan(&conn, "Retired", 900, "USD", BillingPeriod::Monthly, false).unwrap();
    drop(conn);

    let err = run_checkout(&state, "user_6", &retired.id, vec![], vec![]).unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[test]
fn unknown_bundle_leaves_no_state() {
    let state = create_test_app_state();
    let catalog = {
        let conn = state.db.get().unwrap();
        seed_catalog(&conn)
    };

    let err = run_checkout(
        &state,
        "user_7",
        &catalog.pro_plan.id,
        vec!["no-such-bundle".to_string()],
        vec![],
    )
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let conn = state.db.get().unwrap();
    let subs: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM subscriptions WHERE user_id = 'user_7'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    let invoices: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM invoices WHERE user_id = 'user_7'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(subs, 0, "failed validation must not create a subscription");
    assert_eq!(invoices, 0, "failed validation must not create an invoice");
}

#[tokio::test]
async fn checkout_rejects_malformed_body() {
    let state = create_test_app_state();
    let app = test_app(state);

    let response = app
        .oneshot(json_request("/checkout", serde_json::json!({ "user_id": 42 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
