use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    query_all, query_one, ADDON_SUBSCRIPTION_COLS, ADD_ON_COLS, CATEGORY_COLS, INVOICE_COLS,
    LINE_ITEM_COLS, PLAN_COLS, SUBSCRIPTION_COLS, TOKEN_BALANCE_COLS, TOKEN_BUNDLE_COLS,
    TOKEN_PURCHASE_COLS, TOKEN_TRANSACTION_COLS, WEBHOOK_RECORD_COLS,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Invoice numbers are unique and human-scannable: INV-YYYYMMDD-xxxxxxxx.
pub fn generate_invoice_number() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    format!("INV-{}-{}", date, suffix)
}

// ============ Catalog ============

pub fn create_category(conn: &Connection, name: &str, is_single: bool) -> Result<Category> {
    let id = gen_id();
    conn.execute(
        "INSERT INTO categories (id, name, is_single) VALUES (?1, ?2, ?3)",
        params![id, name, is_single],
    )?;
    Ok(Category {
        id,
        name: name.to_string(),
        is_single,
    })
}

pub fn create_plan(
    conn: &Connection,
    name: &str,
    price_cents: i64,
    currency: &str,
    billing_period: BillingPeriod,
    is_active: bool,
) -> Result<Plan> {
    let id = gen_id();
    conn.execute(
        "INSERT INTO plans (id, name, price_cents, currency, billing_period, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, name, price_cents, currency, billing_period.as_str(), is_active],
    )?;
    Ok(Plan {
        id,
        name: name.to_string(),
        price_cents,
        currency: currency.to_string(),
        billing_period,
        is_active,
    })
}

pub fn link_plan_category(conn: &Connection, plan_id: &str, category_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO plan_categories (plan_id, category_id) VALUES (?1, ?2)",
        params![plan_id, category_id],
    )?;
    Ok(())
}

pub fn create_token_bundle(
    conn: &Connection,
    name: &str,
    token_amount: i64,
    price_cents: i64,
    currency: &str,
) -> Result<TokenBundle> {
    let id = gen_id();
    conn.execute(
        "INSERT INTO token_bundles (id, name, token_amount, price_cents, currency, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)",
        params![id, name, token_amount, price_cents, currency],
    )?;
    Ok(TokenBundle {
        id,
        name: name.to_string(),
        token_amount,
        price_cents,
        currency: currency.to_string(),
        is_active: true,
    })
}

pub fn create_add_on(
    conn: &Connection,
    name: &str,
    price_cents: i64,
    currency: &str,
) -> Result<AddOn> {
    let id = gen_id();
    conn.execute(
        "INSERT INTO add_ons (id, name, price_cents, currency, is_active)
         VALUES (?1, ?2, ?3, ?4, 1)",
        params![id, name, price_cents, currency],
    )?;
    Ok(AddOn {
        id,
        name: name.to_string(),
        price_cents,
        currency: currency.to_string(),
        is_active: true,
    })
}

pub fn get_category_by_id(conn: &Connection, id: &str) -> Result<Option<Category>> {
    query_one(
        conn,
        &format!("SELECT {} FROM categories WHERE id = ?1", CATEGORY_COLS),
        &[&id],
    )
}

pub fn get_plan_by_id(conn: &Connection, id: &str) -> Result<Option<Plan>> {
    query_one(
        conn,
        &format!("SELECT {} FROM plans WHERE id = ?1", PLAN_COLS),
        &[&id],
    )
}

pub fn get_token_bundle_by_id(conn: &Connection, id: &str) -> Result<Option<TokenBundle>> {
    query_one(
        conn,
        &format!("SELECT {} FROM token_bundles WHERE id = ?1", TOKEN_BUNDLE_COLS),
        &[&id],
    )
}

pub fn get_add_on_by_id(conn: &Connection, id: &str) -> Result<Option<AddOn>> {
    query_one(
        conn,
        &format!("SELECT {} FROM add_ons WHERE id = ?1", ADD_ON_COLS),
        &[&id],
    )
}

/// Categories a plan belongs to, for single-category enforcement.
pub fn get_categories_for_plan(conn: &Connection, plan_id: &str) -> Result<Vec<Category>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM categories c
             JOIN plan_categories pc ON pc.category_id = c.id
             WHERE pc.plan_id = ?1",
            "c.id, c.name, c.is_single"
        ),
        &[&plan_id],
    )
}

// ============ Subscriptions ============

pub fn create_subscription(
    conn: &Connection,
    user_id: &str,
    plan_id: &str,
    category_id: Option<&str>,
) -> Result<Subscription> {
    let id = gen_id();
    let created_at = now();
    conn.execute(
        "INSERT INTO subscriptions (id, user_id, plan_id, category_id, status, created_at, version)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, 0)",
        params![id, user_id, plan_id, category_id, created_at],
    )?;
    Ok(Subscription {
        id,
        user_id: user_id.to_string(),
        plan_id: plan_id.to_string(),
        category_id: category_id.map(str::to_string),
        status: SubscriptionStatus::Pending,
        started_at: None,
        expires_at: None,
        paused_at: None,
        pending_plan_id: None,
        created_at,
        version: 0,
    })
}

pub fn get_subscription_by_id(conn: &Connection, id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM subscriptions WHERE id = ?1", SUBSCRIPTION_COLS),
        &[&id],
    )
}

/// Active subscriptions a user holds in any of the given categories.
/// Used by checkout to enforce the one-per-category rule.
pub fn find_active_subscriptions(
    conn: &Connection,
    user_id: &str,
    category_ids: &[String],
) -> Result<Vec<Subscription>> {
    if category_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (0..category_ids.len())
        .map(|i| format!("?{}", i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM subscriptions
         WHERE user_id = ?1 AND status = 'active' AND category_id IN ({})",
        SUBSCRIPTION_COLS, placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut owned: Vec<&dyn rusqlite::ToSql> = vec![&user_id];
    for cid in category_ids {
        owned.push(cid);
    }
    let rows = stmt
        .query_map(owned.as_slice(), |row| {
            <Subscription as super::from_row::FromRow>::from_row(row)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Transition a pending subscription to active, guarded by its version.
/// Returns false when the version no longer matches (lost race).
pub fn activate_subscription(
    conn: &Connection,
    id: &str,
    started_at: i64,
    expires_at: i64,
    expected_version: i64,
) -> Result<bool> {
    let n = conn.execute(
        "UPDATE subscriptions
         SET status = 'active', started_at = ?2, expires_at = ?3, version = version + 1
         WHERE id = ?1 AND status = 'pending' AND version = ?4",
        params![id, started_at, expires_at, expected_version],
    )?;
    Ok(n == 1)
}

/// Version-guarded status transition. The allowed `from` statuses make the
/// lifecycle rules explicit at the query layer.
fn transition_subscription(
    conn: &Connection,
    id: &str,
    from: &[SubscriptionStatus],
    to: SubscriptionStatus,
    expected_version: i64,
    set_paused_at: Option<i64>,
) -> Result<bool> {
    let froms = from
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE subscriptions
         SET status = ?2, paused_at = ?3, version = version + 1
         WHERE id = ?1 AND status IN ({}) AND version = ?4",
        froms
    );
    let n = conn.execute(&sql, params![id, to.as_str(), set_paused_at, expected_version])?;
    Ok(n == 1)
}

pub fn cancel_subscription(conn: &Connection, id: &str, expected_version: i64) -> Result<bool> {
    transition_subscription(
        conn,
        id,
        &[SubscriptionStatus::Pending, SubscriptionStatus::Active, SubscriptionStatus::Paused],
        SubscriptionStatus::Cancelled,
        expected_version,
        None,
    )
}

pub fn pause_subscription(conn: &Connection, id: &str, expected_version: i64) -> Result<bool> {
    transition_subscription(
        conn,
        id,
        &[SubscriptionStatus::Active],
        SubscriptionStatus::Paused,
        expected_version,
        Some(now()),
    )
}

pub fn resume_subscription(conn: &Connection, id: &str, expected_version: i64) -> Result<bool> {
    transition_subscription(
        conn,
        id,
        &[SubscriptionStatus::Paused],
        SubscriptionStatus::Active,
        expected_version,
        None,
    )
}

pub fn expire_subscription(conn: &Connection, id: &str, expected_version: i64) -> Result<bool> {
    transition_subscription(
        conn,
        id,
        &[SubscriptionStatus::Active, SubscriptionStatus::Paused],
        SubscriptionStatus::Expired,
        expected_version,
        None,
    )
}

// ============ Token purchases ============

pub fn create_token_purchase(
    conn: &Connection,
    user_id: &str,
    bundle_id: &str,
    token_amount: i64,
) -> Result<TokenPurchase> {
    let id = gen_id();
    let created_at = now();
    conn.execute(
        "INSERT INTO token_purchases (id, user_id, bundle_id, token_amount, status, created_at, version)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, 0)",
        params![id, user_id, bundle_id, token_amount, created_at],
    )?;
    Ok(TokenPurchase {
        id,
        user_id: user_id.to_string(),
        bundle_id: bundle_id.to_string(),
        token_amount,
        status: TokenPurchaseStatus::Pending,
        created_at,
        version: 0,
    })
}

pub fn get_token_purchase_by_id(conn: &Connection, id: &str) -> Result<Option<TokenPurchase>> {
    query_one(
        conn,
        &format!("SELECT {} FROM token_purchases WHERE id = ?1", TOKEN_PURCHASE_COLS),
        &[&id],
    )
}

pub fn complete_token_purchase(
    conn: &Connection,
    id: &str,
    expected_version: i64,
) -> Result<bool> {
    let n = conn.execute(
        "UPDATE token_purchases
         SET status = 'completed', version = version + 1
         WHERE id = ?1 AND status = 'pending' AND version = ?2",
        params![id, expected_version],
    )?;
    Ok(n == 1)
}

// ============ Add-on subscriptions ============

pub fn create_addon_subscription(
    conn: &Connection,
    user_id: &str,
    addon_id: &str,
) -> Result<AddonSubscription> {
    let id = gen_id();
    let created_at = now();
    conn.execute(
        "INSERT INTO addon_subscriptions (id, user_id, addon_id, status, created_at, version)
         VALUES (?1, ?2, ?3, 'pending', ?4, 0)",
        params![id, user_id, addon_id, created_at],
    )?;
    Ok(AddonSubscription {
        id,
        user_id: user_id.to_string(),
        addon_id: addon_id.to_string(),
        status: AddonStatus::Pending,
        started_at: None,
        created_at,
        version: 0,
    })
}

pub fn get_addon_subscription_by_id(
    conn: &Connection,
    id: &str,
) -> Result<Option<AddonSubscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM addon_subscriptions WHERE id = ?1",
            ADDON_SUBSCRIPTION_COLS
        ),
        &[&id],
    )
}

pub fn activate_addon_subscription(
    conn: &Connection,
    id: &str,
    started_at: i64,
    expected_version: i64,
) -> Result<bool> {
    let n = conn.execute(
        "UPDATE addon_subscriptions
         SET status = 'active', started_at = ?2, version = version + 1
         WHERE id = ?1 AND status = 'pending' AND version = ?3",
        params![id, started_at, expected_version],
    )?;
    Ok(n == 1)
}

// ============ Invoices ============

pub struct CreateLineItem {
    pub item_type: LineItemType,
    pub item_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

pub fn create_invoice(
    conn: &Connection,
    user_id: &str,
    subscription_id: Option<&str>,
    currency: &str,
    line_items: &[CreateLineItem],
) -> Result<Invoice> {
    let id = gen_id();
    let invoice_number = generate_invoice_number();
    let created_at = now();
    let subtotal_cents: i64 = line_items.iter().map(|li| li.amount_cents).sum();
    // Tax is out of scope; total == subtotal until a tax collaborator exists.
    let tax_cents = 0i64;
    let total_cents = subtotal_cents + tax_cents;

    conn.execute(
        "INSERT INTO invoices (id, user_id, subscription_id, invoice_number, status,
             subtotal_cents, tax_cents, total_cents, currency, created_at, version)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, 0)",
        params![
            id,
            user_id,
            subscription_id,
            invoice_number,
            subtotal_cents,
            tax_cents,
            total_cents,
            currency,
            created_at
        ],
    )?;

    for li in line_items {
        conn.execute(
            "INSERT INTO invoice_line_items (id, invoice_id, item_type, item_id, amount_cents, currency)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                gen_id(),
                id,
                li.item_type.as_str(),
                li.item_id,
                li.amount_cents,
                li.currency
            ],
        )?;
    }

    Ok(Invoice {
        id,
        user_id: user_id.to_string(),
        subscription_id: subscription_id.map(str::to_string),
        invoice_number,
        status: InvoiceStatus::Pending,
        subtotal_cents,
        tax_cents,
        total_cents,
        currency: currency.to_string(),
        created_at,
        paid_at: None,
        version: 0,
    })
}

pub fn get_invoice_by_id(conn: &Connection, id: &str) -> Result<Option<Invoice>> {
    query_one(
        conn,
        &format!("SELECT {} FROM invoices WHERE id = ?1", INVOICE_COLS),
        &[&id],
    )
}

pub fn get_invoice_by_number(conn: &Connection, number: &str) -> Result<Option<Invoice>> {
    query_one(
        conn,
        &format!("SELECT {} FROM invoices WHERE invoice_number = ?1", INVOICE_COLS),
        &[&number],
    )
}

pub fn get_line_items(conn: &Connection, invoice_id: &str) -> Result<Vec<InvoiceLineItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM invoice_line_items WHERE invoice_id = ?1 ORDER BY rowid",
            LINE_ITEM_COLS
        ),
        &[&invoice_id],
    )
}

/// Mark a pending invoice paid. Guarded by version and status so a paid
/// invoice can never transition again.
pub fn mark_invoice_paid(
    conn: &Connection,
    id: &str,
    paid_at: i64,
    expected_version: i64,
) -> Result<bool> {
    let n = conn.execute(
        "UPDATE invoices
         SET status = 'paid', paid_at = ?2, version = version + 1
         WHERE id = ?1 AND status = 'pending' AND version = ?3",
        params![id, paid_at, expected_version],
    )?;
    Ok(n == 1)
}

pub fn mark_invoice_failed(conn: &Connection, id: &str, expected_version: i64) -> Result<bool> {
    let n = conn.execute(
        "UPDATE invoices
         SET status = 'failed', version = version + 1
         WHERE id = ?1 AND status = 'pending' AND version = ?2",
        params![id, expected_version],
    )?;
    Ok(n == 1)
}

// ============ Token ledger ============

pub fn get_token_balance(conn: &Connection, user_id: &str) -> Result<Option<TokenBalance>> {
    query_one(
        conn,
        &format!("SELECT {} FROM token_balances WHERE user_id = ?1", TOKEN_BALANCE_COLS),
        &[&user_id],
    )
}

/// Read the balance row, creating a zero row on first use.
pub fn ensure_token_balance(conn: &Connection, user_id: &str) -> Result<TokenBalance> {
    conn.execute(
        "INSERT OR IGNORE INTO token_balances (user_id, balance, version) VALUES (?1, 0, 0)",
        params![user_id],
    )?;
    Ok(get_token_balance(conn, user_id)?.unwrap_or(TokenBalance {
        user_id: user_id.to_string(),
        balance: 0,
        version: 0,
    }))
}

/// Optimistically-locked balance write. Returns false on version conflict.
pub fn update_token_balance(
    conn: &Connection,
    user_id: &str,
    new_balance: i64,
    expected_version: i64,
) -> Result<bool> {
    let n = conn.execute(
        "UPDATE token_balances
         SET balance = ?2, version = version + 1
         WHERE user_id = ?1 AND version = ?3",
        params![user_id, new_balance, expected_version],
    )?;
    Ok(n == 1)
}

pub fn insert_token_transaction(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    tx_type: TokenTransactionType,
    reference_id: Option<&str>,
    balance_after: i64,
) -> Result<TokenTransaction> {
    let id = gen_id();
    let created_at = now();
    conn.execute(
        "INSERT INTO token_transactions (id, user_id, amount, tx_type, reference_id, balance_after, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, user_id, amount, tx_type.as_str(), reference_id, balance_after, created_at],
    )?;
    Ok(TokenTransaction {
        id,
        user_id: user_id.to_string(),
        amount,
        tx_type,
        reference_id: reference_id.map(str::to_string),
        balance_after,
        created_at,
    })
}

pub fn list_token_transactions(conn: &Connection, user_id: &str) -> Result<Vec<TokenTransaction>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM token_transactions WHERE user_id = ?1 ORDER BY created_at, rowid",
            TOKEN_TRANSACTION_COLS
        ),
        &[&user_id],
    )
}

// ============ Webhook records ============

/// Outcome of attempting to claim a webhook delivery for processing.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookClaim {
    /// This request owns processing for the event.
    Claimed,
    /// A previous delivery already settled the event.
    AlreadySettled(WebhookStatus),
}

/// Record and claim a webhook delivery. The UNIQUE(provider, event_id)
/// constraint arbitrates races: the insert either creates a fresh row or
/// leaves the existing one, whose status decides the outcome. Unsettled
/// rows (received/processing/failed) are re-claimed so interrupted or
/// failed deliveries can be retried by the provider.
pub fn claim_webhook_record(
    conn: &Connection,
    provider: &str,
    event_id: &str,
) -> Result<WebhookClaim> {
    let ts = now();
    conn.execute(
        "INSERT OR IGNORE INTO webhook_records (id, provider, event_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'received', ?4, ?4)",
        params![gen_id(), provider, event_id, ts],
    )?;

    let status: String = conn.query_row(
        "SELECT status FROM webhook_records WHERE provider = ?1 AND event_id = ?2",
        params![provider, event_id],
        |row| row.get(0),
    )?;
    let status: WebhookStatus = status
        .parse()
        .map_err(|e: String| crate::error::AppError::Internal(e))?;

    if status.is_settled() {
        return Ok(WebhookClaim::AlreadySettled(status));
    }

    conn.execute(
        "UPDATE webhook_records SET status = 'processing', updated_at = ?3
         WHERE provider = ?1 AND event_id = ?2",
        params![provider, event_id, now()],
    )?;
    Ok(WebhookClaim::Claimed)
}

pub fn settle_webhook_record(
    conn: &Connection,
    provider: &str,
    event_id: &str,
    status: WebhookStatus,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE webhook_records SET status = ?3, error = ?4, updated_at = ?5
         WHERE provider = ?1 AND event_id = ?2",
        params![provider, event_id, status.as_str(), error, now()],
    )?;
    Ok(())
}

pub fn get_webhook_record(
    conn: &Connection,
    provider: &str,
    event_id: &str,
) -> Result<Option<WebhookRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM webhook_records WHERE provider = ?1 AND event_id = ?2",
            WEBHOOK_RECORD_COLS
        ),
        &[&provider, &event_id],
    )
}

// ============ Idempotency cache ============

/// Fetch a cached response for the key, ignoring expired rows.
pub fn idempotency_check(conn: &Connection, key: &str, now_ts: i64) -> Result<Option<String>> {
    let cached: Option<String> = conn
        .query_row(
            "SELECT response FROM idempotency_keys WHERE key = ?1 AND expires_at > ?2",
            params![key, now_ts],
            |row| row.get(0),
        )
        .optional()?;
    Ok(cached)
}

/// Store a response unless the key already exists. Returns false when a
/// concurrent request won the race; the caller should read the winner's
/// result via `idempotency_check`.
pub fn idempotency_store(
    conn: &Connection,
    key: &str,
    response: &str,
    expires_at: i64,
) -> Result<bool> {
    // Expired rows may be overwritten; live rows win races.
    conn.execute(
        "DELETE FROM idempotency_keys WHERE key = ?1 AND expires_at <= ?2",
        params![key, now()],
    )?;
    let n = conn.execute(
        "INSERT OR IGNORE INTO idempotency_keys (key, response, expires_at) VALUES (?1, ?2, ?3)",
        params![key, response, expires_at],
    )?;
    Ok(n == 1)
}

pub fn idempotency_purge_expired(conn: &Connection, now_ts: i64) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM idempotency_keys WHERE expires_at <= ?1",
        params![now_ts],
    )?;
    Ok(n)
}
