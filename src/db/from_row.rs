//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on unexpected database values.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const CATEGORY_COLS: &str = "id, name, is_single";

pub const PLAN_COLS: &str = "id, name, price_cents, currency, billing_period, is_active";

pub const TOKEN_BUNDLE_COLS: &str =
    "id, name, token_amount, price_cents, currency, is_active";

pub const ADD_ON_COLS: &str = "id, name, price_cents, currency, is_active";

pub const SUBSCRIPTION_COLS: &str = "id, user_id, plan_id, category_id, status, started_at, \
     expires_at, paused_at, pending_plan_id, created_at, version";

pub const TOKEN_PURCHASE_COLS: &str =
    "id, user_id, bundle_id, token_amount, status, created_at, version";

pub const ADDON_SUBSCRIPTION_COLS: &str =
    "id, user_id, addon_id, status, started_at, created_at, version";

pub const INVOICE_COLS: &str = "id, user_id, subscription_id, invoice_number, status, \
     subtotal_cents, tax_cents, total_cents, currency, created_at, paid_at, version";

pub const LINE_ITEM_COLS: &str = "id, invoice_id, item_type, item_id, amount_cents, currency";

pub const TOKEN_BALANCE_COLS: &str = "user_id, balance, version";

pub const TOKEN_TRANSACTION_COLS: &str =
    "id, user_id, amount, tx_type, reference_id, balance_after, created_at";

pub const WEBHOOK_RECORD_COLS: &str =
    "id, provider, event_id, status, error, created_at, updated_at";

// ============ FromRow Implementations ============

impl FromRow for Category {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
            is_single: row.get(2)?,
        })
    }
}

impl FromRow for Plan {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Plan {
            id: row.get(0)?,
            name: row.get(1)?,
            price_cents: row.get(2)?,
            currency: row.get(3)?,
            billing_period: parse_enum(row, 4, "billing_period")?,
            is_active: row.get(5)?,
        })
    }
}

impl FromRow for TokenBundle {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(TokenBundle {
            id: row.get(0)?,
            name: row.get(1)?,
            token_amount: row.get(2)?,
            price_cents: row.get(3)?,
            currency: row.get(4)?,
            is_active: row.get(5)?,
        })
    }
}

impl FromRow for AddOn {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AddOn {
            id: row.get(0)?,
            name: row.get(1)?,
            price_cents: row.get(2)?,
            currency: row.get(3)?,
            is_active: row.get(4)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            plan_id: row.get(2)?,
            category_id: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            started_at: row.get(5)?,
            expires_at: row.get(6)?,
            paused_at: row.get(7)?,
            pending_plan_id: row.get(8)?,
            created_at: row.get(9)?,
            version: row.get(10)?,
        })
    }
}

impl FromRow for TokenPurchase {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(TokenPurchase {
            id: row.get(0)?,
            user_id: row.get(1)?,
            bundle_id: row.get(2)?,
            token_amount: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            created_at: row.get(5)?,
            version: row.get(6)?,
        })
    }
}

impl FromRow for AddonSubscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AddonSubscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            addon_id: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            started_at: row.get(4)?,
            created_at: row.get(5)?,
            version: row.get(6)?,
        })
    }
}

impl FromRow for Invoice {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Invoice {
            id: row.get(0)?,
            user_id: row.get(1)?,
            subscription_id: row.get(2)?,
            invoice_number: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            subtotal_cents: row.get(5)?,
            tax_cents: row.get(6)?,
            total_cents: row.get(7)?,
            currency: row.get(8)?,
            created_at: row.get(9)?,
            paid_at: row.get(10)?,
            version: row.get(11)?,
        })
    }
}

impl FromRow for InvoiceLineItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(InvoiceLineItem {
            id: row.get(0)?,
            invoice_id: row.get(1)?,
            item_type: parse_enum(row, 2, "item_type")?,
            item_id: row.get(3)?,
            amount_cents: row.get(4)?,
            currency: row.get(5)?,
        })
    }
}

impl FromRow for TokenBalance {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(TokenBalance {
            user_id: row.get(0)?,
            balance: row.get(1)?,
            version: row.get(2)?,
        })
    }
}

impl FromRow for TokenTransaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(TokenTransaction {
            id: row.get(0)?,
            user_id: row.get(1)?,
            amount: row.get(2)?,
            tx_type: parse_enum(row, 3, "tx_type")?,
            reference_id: row.get(4)?,
            balance_after: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for WebhookRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookRecord {
            id: row.get(0)?,
            provider: row.get(1)?,
            event_id: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            error: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}
