//! Idempotency store tests against a real database.

mod common;

use common::*;
use serde_json::json;

#[test]
fn stored_result_is_returned_on_check() {
    let pool = setup_test_pool();
    let store = IdempotencyStore::new(pool);
    let key = IdempotencyStore::generate_key("mock", "capture", &["evt_1"]);

    assert!(store.check(&key).unwrap().is_none());

    let result = json!({ "invoice": "INV-1", "status": "paid" });
    let stored = store.store(&key, &result).unwrap();
    assert_eq!(stored, result);

    let cached = store.check(&key).unwrap().expect("result should be cached");
    assert_eq!(cached, result);
}

#[test]
fn first_writer_wins_a_race() {
    let pool = setup_test_pool();
    let store = IdempotencyStore::new(pool);
    let key = IdempotencyStore::generate_key("mock", "capture", &["evt_race"]);

    let first = store.store(&key, &json!({ "winner": 1 })).unwrap();
    assert_eq!(first["winner"], 1);

    // A second store for the same key observes the first result
    let second = store.store(&key, &json!({ "winner": 2 })).unwrap();
    assert_eq!(second["winner"], 1);
    assert_eq!(store.check(&key).unwrap().unwrap()["winner"], 1);
}

#[test]
fn expired_entries_are_invisible_and_replaceable() {
    let pool = setup_test_pool();
    let store = IdempotencyStore::with_ttl(pool.clone(), 0);
    let key = IdempotencyStore::generate_key("mock", "capture", &["evt_exp"]);

    store.store(&key, &json!({ "gen": 1 })).unwrap();
    assert!(store.check(&key).unwrap().is_none(), "ttl 0 expires immediately");

    // An expired row does not win races against a fresh write
    let live = IdempotencyStore::new(pool);
    let replaced = live.store(&key, &json!({ "gen": 2 })).unwrap();
    assert_eq!(replaced["gen"], 2);
    assert_eq!(live.check(&key).unwrap().unwrap()["gen"], 2);
}

#[test]
fn purge_removes_only_expired_rows() {
    let pool = setup_test_pool();
    let expiring = IdempotencyStore::with_ttl(pool.clone(), 0);
    let live = IdempotencyStore::new(pool);

    expiring.store("dead_key", &json!(1)).unwrap();
    live.store("live_key", &json!(2)).unwrap();

    let purged = live.purge_expired().unwrap();
    assert_eq!(purged, 1);
    assert_eq!(live.check("live_key").unwrap().unwrap(), json!(2));
}
