//! Token ledger: append-only transaction log plus a version-guarded
//! aggregate balance.
//!
//! Every credit/debit is a read-compute-write cycle guarded by the balance
//! row's version. A conflicting concurrent write makes the guarded update
//! match zero rows; the whole cycle is retried from the fresh balance, up
//! to a bounded attempt count. The ledger row and the balance write commit
//! under one savepoint so a conflict never leaves an orphan ledger entry;
//! savepoints nest, so callers may already hold a transaction.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{TokenBalance, TokenTransaction, TokenTransactionType};

/// Attempts per credit/debit before surfacing ConcurrentModification.
pub const MAX_ATTEMPTS: u32 = 3;

pub struct TokenLedger;

impl TokenLedger {
    /// Credit `amount` tokens to the user. Returns the written ledger entry.
    pub fn credit(
        conn: &Connection,
        user_id: &str,
        amount: i64,
        tx_type: TokenTransactionType,
        reference_id: Option<&str>,
    ) -> Result<TokenTransaction> {
        if amount <= 0 {
            return Err(AppError::BadRequest(format!(
                "credit amount must be positive, got {amount}"
            )));
        }
        Self::apply(conn, user_id, amount, tx_type, reference_id)
    }

    /// Debit `amount` tokens. Fails with InsufficientBalance rather than
    /// ever letting the balance go negative.
    pub fn debit(
        conn: &Connection,
        user_id: &str,
        amount: i64,
        tx_type: TokenTransactionType,
        reference_id: Option<&str>,
    ) -> Result<TokenTransaction> {
        if amount <= 0 {
            return Err(AppError::BadRequest(format!(
                "debit amount must be positive, got {amount}"
            )));
        }
        Self::apply(conn, user_id, -amount, tx_type, reference_id)
    }

    fn apply(
        conn: &Connection,
        user_id: &str,
        signed_amount: i64,
        tx_type: TokenTransactionType,
        reference_id: Option<&str>,
    ) -> Result<TokenTransaction> {
        for attempt in 0..MAX_ATTEMPTS {
            // Read without creating: a rejected debit for an unknown user
            // must leave no balance row behind.
            let balance = queries::get_token_balance(conn, user_id)?.unwrap_or(TokenBalance {
                user_id: user_id.to_string(),
                balance: 0,
                version: 0,
            });
            let new_balance = balance.balance + signed_amount;

            if new_balance < 0 {
                return Err(AppError::InsufficientBalance {
                    requested: -signed_amount,
                    available: balance.balance,
                });
            }

            conn.execute_batch("SAVEPOINT ledger_apply")?;
            let outcome = (|| -> Result<Option<TokenTransaction>> {
                queries::ensure_token_balance(conn, user_id)?;
                let entry = queries::insert_token_transaction(
                    conn,
                    user_id,
                    signed_amount,
                    tx_type,
                    reference_id,
                    new_balance,
                )?;
                if queries::update_token_balance(conn, user_id, new_balance, balance.version)? {
                    Ok(Some(entry))
                } else {
                    Ok(None)
                }
            })();

            match outcome {
                Ok(Some(entry)) => {
                    conn.execute_batch("RELEASE ledger_apply")?;
                    return Ok(entry);
                }
                Ok(None) => {
                    // Version moved under us; roll back the ledger entry and
                    // retry the whole read-compute-write cycle.
                    conn.execute_batch("ROLLBACK TO ledger_apply; RELEASE ledger_apply")?;
                    tracing::debug!(user_id, attempt, "token balance version conflict, retrying");
                }
                Err(e) => {
                    conn.execute_batch("ROLLBACK TO ledger_apply; RELEASE ledger_apply")?;
                    return Err(e);
                }
            }
        }

        Err(AppError::ConcurrentModification(format!(
            "token balance for user {user_id} kept changing after {MAX_ATTEMPTS} attempts"
        )))
    }
}
