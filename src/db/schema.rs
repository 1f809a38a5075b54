use rusqlite::Connection;

/// Initialize the database schema.
///
/// Catalog tables (categories, plans, bundles, add-ons) hold read-mostly
/// collaborator data; everything else is owned by this service.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Catalog: plan categories. is_single = 1 means at most one active
        -- subscription per user in this category.
        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            is_single INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'USD',
            billing_period TEXT NOT NULL CHECK (billing_period IN
                ('weekly', 'monthly', 'quarterly', 'yearly', 'one_time')),
            is_active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS plan_categories (
            plan_id TEXT NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
            category_id TEXT NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            PRIMARY KEY (plan_id, category_id)
        );

        CREATE TABLE IF NOT EXISTS token_bundles (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            token_amount INTEGER NOT NULL,
            price_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'USD',
            is_active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS add_ons (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'USD',
            is_active INTEGER NOT NULL DEFAULT 1
        );

        -- Subscriptions: created pending at checkout, activated only by the
        -- payment capture handler. version guards concurrent updates.
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            plan_id TEXT NOT NULL REFERENCES plans(id),
            category_id TEXT REFERENCES categories(id),
            status TEXT NOT NULL CHECK (status IN
                ('pending', 'active', 'paused', 'cancelled', 'expired')),
            started_at INTEGER,
            expires_at INTEGER,
            paused_at INTEGER,
            pending_plan_id TEXT REFERENCES plans(id),
            created_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user_status
            ON subscriptions(user_id, status);

        CREATE TABLE IF NOT EXISTS token_purchases (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            bundle_id TEXT NOT NULL REFERENCES token_bundles(id),
            token_amount INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'completed')),
            created_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_token_purchases_user ON token_purchases(user_id);

        CREATE TABLE IF NOT EXISTS addon_subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            addon_id TEXT NOT NULL REFERENCES add_ons(id),
            status TEXT NOT NULL CHECK (status IN ('pending', 'active', 'cancelled')),
            started_at INTEGER,
            created_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_addon_subscriptions_user
            ON addon_subscriptions(user_id);

        CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            subscription_id TEXT REFERENCES subscriptions(id),
            invoice_number TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL CHECK (status IN ('pending', 'paid', 'failed', 'void')),
            subtotal_cents INTEGER NOT NULL,
            tax_cents INTEGER NOT NULL DEFAULT 0,
            total_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'USD',
            created_at INTEGER NOT NULL,
            paid_at INTEGER,
            version INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_invoices_user ON invoices(user_id);
        CREATE INDEX IF NOT EXISTS idx_invoices_number ON invoices(invoice_number);

        CREATE TABLE IF NOT EXISTS invoice_line_items (
            id TEXT PRIMARY KEY,
            invoice_id TEXT NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
            item_type TEXT NOT NULL CHECK (item_type IN
                ('subscription', 'token_bundle', 'add_on')),
            item_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'USD'
        );
        CREATE INDEX IF NOT EXISTS idx_line_items_invoice
            ON invoice_line_items(invoice_id);

        -- Token ledger: balance row with optimistic lock, plus an append-only
        -- transaction log. balance never goes negative.
        CREATE TABLE IF NOT EXISTS token_balances (
            user_id TEXT PRIMARY KEY,
            balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
            version INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS token_transactions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            tx_type TEXT NOT NULL CHECK (tx_type IN
                ('purchase', 'usage', 'refund', 'adjustment')),
            reference_id TEXT,
            balance_after INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_token_transactions_user
            ON token_transactions(user_id);
        CREATE INDEX IF NOT EXISTS idx_token_transactions_ref
            ON token_transactions(reference_id);

        -- Webhook deliveries: the UNIQUE constraint is the storage-level
        -- dedupe guard under at-least-once delivery.
        CREATE TABLE IF NOT EXISTS webhook_records (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN
                ('received', 'processing', 'processed', 'failed', 'skipped')),
            error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(provider, event_id)
        );

        -- Idempotency cache: successful operation results keyed by a
        -- deterministic hash, expired lazily.
        CREATE TABLE IF NOT EXISTS idempotency_keys (
            key TEXT PRIMARY KEY,
            response TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_idempotency_expiry
            ON idempotency_keys(expires_at);
        "#,
    )
}
