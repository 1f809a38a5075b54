//! Deterministic-key idempotency cache for side-effecting operations.
//!
//! Backed by the shared database so the at-most-once guarantee holds
//! across replicas, not just within one process. Only successful results
//! are ever stored; a failed operation leaves no key behind, so a retried
//! request re-executes instead of being suppressed forever.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::db::{queries, DbPool};
use crate::error::Result;

pub const DEFAULT_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Clone)]
pub struct IdempotencyStore {
    db: DbPool,
    ttl_secs: i64,
}

impl IdempotencyStore {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }

    pub fn with_ttl(db: DbPool, ttl_secs: i64) -> Self {
        Self { db, ttl_secs }
    }

    /// Deterministic key: identical logical requests collapse to one key.
    pub fn generate_key(provider: &str, operation: &str, args: &[&str]) -> String {
        let data = format!("{}:{}:{}", provider, operation, args.join(":"));
        let digest = Sha256::digest(data.as_bytes());
        hex::encode(digest)[..32].to_string()
    }

    /// Cached result for the key, or None when absent or expired.
    pub fn check(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.db.get()?;
        match queries::idempotency_check(&conn, key, queries::now())? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Store a successful result. When a concurrent request stored first,
    /// its result wins and is returned, so all racers observe one outcome.
    pub fn store(&self, key: &str, result: &Value) -> Result<Value> {
        let conn = self.db.get()?;
        let expires_at = queries::now() + self.ttl_secs;
        let raw = serde_json::to_string(result)?;
        if queries::idempotency_store(&conn, key, &raw, expires_at)? {
            return Ok(result.clone());
        }
        // Lost the race; read the winner's result.
        match queries::idempotency_check(&conn, key, queries::now())? {
            Some(winner) => Ok(serde_json::from_str(&winner)?),
            None => Ok(result.clone()),
        }
    }

    /// Drop expired rows. Called opportunistically; correctness never
    /// depends on it because reads filter on expiry.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.db.get()?;
        queries::idempotency_purge_expired(&conn, queries::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic() {
        let a = IdempotencyStore::generate_key("stripe", "capture", &["evt_1"]);
        let b = IdempotencyStore::generate_key("stripe", "capture", &["evt_1"]);
        let c = IdempotencyStore::generate_key("stripe", "capture", &["evt_2"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn provider_and_operation_are_part_of_the_key() {
        let a = IdempotencyStore::generate_key("stripe", "capture", &["evt_1"]);
        let b = IdempotencyStore::generate_key("paypal", "capture", &["evt_1"]);
        let c = IdempotencyStore::generate_key("stripe", "refund", &["evt_1"]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
