//! Subscription lifecycle tests: the pause/resume cycle, terminal states,
//! and version-guarded transitions.

mod common;

use common::*;

fn active_subscription(state: &AppState, user: &str) -> Subscription {
    let catalog = {
        let conn = state.db.get().unwrap();
        seed_catalog(&conn)
    };
    // Free plan activates synchronously through the capture path
    let checkout = run_checkout(state, user, &catalog.free_plan.id, vec![], vec![]).unwrap();
    assert_eq!(checkout.subscription.status, SubscriptionStatus::Active);
    checkout.subscription
}

#[test]
fn pause_and_resume_round_trip() {
    let state = create_test_app_state();
    let sub = active_subscription(&state, "lc_1");
    let conn = state.db.get().unwrap();

    assert!(queries::pause_subscription(&conn, &sub.id, sub.version).unwrap());
    let paused = queries::get_subscription_by_id(&conn, &sub.id).unwrap().unwrap();
    assert_eq!(paused.status, SubscriptionStatus::Paused);
    assert!(paused.paused_at.is_some());

    assert!(queries::resume_subscription(&conn, &sub.id, paused.version).unwrap());
    let resumed = queries::get_subscription_by_id(&conn, &sub.id).unwrap().unwrap();
    assert_eq!(resumed.status, SubscriptionStatus::Active);
    assert!(resumed.paused_at.is_none());
}

#[test]
fn pending_subscriptions_cannot_pause() {
    let state = create_test_app_state();
    let catalog = {
        let conn = state.db.get().unwrap();
        seed_catalog(&conn)
    };
    let checkout = run_checkout(&state, "lc_2", &catalog.pro_plan.id, vec![], vec![]).unwrap();
    let sub = checkout.subscription;
    assert_eq!(sub.status, SubscriptionStatus::Pending);

    let conn = state.db.get().unwrap();
    assert!(!queries::pause_subscription(&conn, &sub.id, sub.version).unwrap());
}

#[test]
fn cancelled_is_terminal() {
    let state = create_test_app_state();
    let sub = active_subscription(&state, "lc_3");
    let conn = state.db.get().unwrap();

    assert!(queries::cancel_subscription(&conn, &sub.id, sub.version).unwrap());
    let cancelled = queries::get_subscription_by_id(&conn, &sub.id).unwrap().unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert!(cancelled.status.is_terminal());

    // No transition leaves a terminal state
    assert!(!queries::resume_subscription(&conn, &sub.id, cancelled.version).unwrap());
    assert!(!queries::expire_subscription(&conn, &sub.id, cancelled.version).unwrap());
    assert!(!queries::pause_subscription(&conn, &sub.id, cancelled.version).unwrap());
}

#[test]
fn expired_can_come_from_paused() {
    let state = create_test_app_state();
    let sub = active_subscription(&state, "lc_4");
    let conn = state.db.get().unwrap();

    assert!(queries::pause_subscription(&conn, &sub.id, sub.version).unwrap());
    let paused = queries::get_subscription_by_id(&conn, &sub.id).unwrap().unwrap();
    assert!(queries::expire_subscription(&conn, &sub.id, paused.version).unwrap());

    let expired = queries::get_subscription_by_id(&conn, &sub.id).unwrap().unwrap();
    assert_eq!(expired.status, SubscriptionStatus::Expired);
}

#[test]
fn stale_version_transition_is_refused() {
    let state = create_test_app_state();
    let sub = active_subscription(&state, "lc_5");
    let conn = state.db.get().unwrap();

    // Version moves with the first transition; the stale one misses
    assert!(queries::pause_subscription(&conn, &sub.id, sub.version).unwrap());
    assert!(!queries::cancel_subscription(&conn, &sub.id, sub.version).unwrap());

    let fresh = queries::get_subscription_by_id(&conn, &sub.id).unwrap().unwrap();
    assert_eq!(fresh.status, SubscriptionStatus::Paused);
}

#[test]
fn cancelling_an_active_subscription_frees_its_category() {
    let state = create_test_app_state();
    let catalog = {
        let conn = state.db.get().unwrap();
        seed_catalog(&conn)
    };

    let checkout = run_checkout(&state, "lc_6", &catalog.free_plan.id, vec![], vec![]).unwrap();
    {
        let conn = state.db.get().unwrap();
        let sub = &checkout.subscription;
        assert!(queries::cancel_subscription(&conn, &sub.id, sub.version).unwrap());
    }

    // The single category is free again after cancellation
    run_checkout(&state, "lc_6", &catalog.pro_plan.id, vec![], vec![])
        .expect("cancelled subscription must not block a new checkout");
}
