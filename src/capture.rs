//! Payment capture: the state machine that turns a pending invoice and its
//! line items into paid/active records, exactly once.
//!
//! Guards, in order: idempotency-cache hit returns the prior result;
//! an already-paid invoice is a success no-op; each line item transition
//! checks its own current status, so a retried delivery only completes
//! whatever a previous partial failure left pending. The invoice is marked
//! paid strictly after every item activation succeeded, and only that
//! final success is written to the idempotency cache.

use serde_json::json;

use crate::db::{queries, DbPool};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::events::{priority, Event, EventContext, EventHandler, EventResult};
use crate::idempotency::IdempotencyStore;
use crate::ledger::TokenLedger;
use crate::models::{
    AddonStatus, Invoice, InvoiceStatus, LineItemType, SubscriptionStatus, TokenPurchaseStatus,
    TokenTransactionType,
};

const SECS_PER_DAY: i64 = 86_400;

pub struct PaymentCaptureHandler {
    db: DbPool,
    idempotency: IdempotencyStore,
}

impl PaymentCaptureHandler {
    pub fn new(db: DbPool, idempotency: IdempotencyStore) -> Self {
        Self { db, idempotency }
    }

    fn load_invoice(&self, ctx: &EventContext, reference: &str) -> Result<Invoice> {
        if reference.is_empty() {
            return Err(AppError::BadRequest(
                "payment event carries no invoice reference".into(),
            ));
        }
        // Memoized per dispatch: several handlers may need the invoice.
        let value = ctx.get_or_compute(&format!("invoice:{reference}"), || {
            let conn = self.db.get()?;
            let invoice = queries::get_invoice_by_number(&conn, reference)?
                .or_not_found(msg::INVOICE_NOT_FOUND)?;
            Ok(serde_json::to_value(invoice)?)
        })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Activate one line item if it is still pending. Re-invocable: items
    /// already past pending are skipped. Returns true when this call did
    /// the activation.
    fn activate_line_item(
        &self,
        conn: &rusqlite::Connection,
        invoice: &Invoice,
        item_type: LineItemType,
        item_id: &str,
    ) -> Result<bool> {
        match item_type {
            LineItemType::Subscription => {
                let sub = queries::get_subscription_by_id(conn, item_id)?
                    .or_not_found("Subscription for line item not found")?;
                match sub.status {
                    SubscriptionStatus::Active => Ok(false),
                    SubscriptionStatus::Pending => {
                        // The single-category rule is checked again here:
                        // a second checkout made while this one was still
                        // pending may have been captured first.
                        if let Some(category_id) = sub.category_id.as_deref() {
                            let is_single = queries::get_category_by_id(conn, category_id)?
                                .map(|c| c.is_single)
                                .unwrap_or(false);
                            if is_single {
                                let held = queries::find_active_subscriptions(
                                    conn,
                                    &sub.user_id,
                                    &[category_id.to_string()],
                                )?;
                                if !held.is_empty() {
                                    return Err(AppError::AlreadySubscribed(format!(
                                        "user {} already holds an active subscription in category {}",
                                        sub.user_id, category_id
                                    )));
                                }
                            }
                        }
                        let plan = queries::get_plan_by_id(conn, &sub.plan_id)?
                            .or_not_found(msg::PLAN_NOT_FOUND)?;
                        let started_at = queries::now();
                        let expires_at =
                            started_at + plan.billing_period.duration_days() * SECS_PER_DAY;
                        if !queries::activate_subscription(
                            conn,
                            &sub.id,
                            started_at,
                            expires_at,
                            sub.version,
                        )? {
                            return Err(AppError::Conflict(format!(
                                "subscription {} changed during activation",
                                sub.id
                            )));
                        }
                        Ok(true)
                    }
                    other => Err(AppError::Conflict(format!(
                        "subscription {} is {} and cannot be activated",
                        sub.id, other
                    ))),
                }
            }
            LineItemType::TokenBundle => {
                let purchase = queries::get_token_purchase_by_id(conn, item_id)?
                    .or_not_found("Token purchase for line item not found")?;
                if purchase.status == TokenPurchaseStatus::Completed {
                    return Ok(false);
                }
                // Completion flag and ledger credit commit together, so a
                // retry can trust the flag: completed means credited.
                let tx = conn.unchecked_transaction()?;
                if !queries::complete_token_purchase(&tx, &purchase.id, purchase.version)? {
                    return Err(AppError::Conflict(format!(
                        "token purchase {} changed during activation",
                        purchase.id
                    )));
                }
                TokenLedger::credit(
                    &tx,
                    &purchase.user_id,
                    purchase.token_amount,
                    TokenTransactionType::Purchase,
                    Some(&invoice.id),
                )?;
                tx.commit()?;
                Ok(true)
            }
            LineItemType::AddOn => {
                let addon_sub = queries::get_addon_subscription_by_id(conn, item_id)?
                    .or_not_found("Add-on subscription for line item not found")?;
                match addon_sub.status {
                    AddonStatus::Active => Ok(false),
                    AddonStatus::Pending => {
                        if !queries::activate_addon_subscription(
                            conn,
                            &addon_sub.id,
                            queries::now(),
                            addon_sub.version,
                        )? {
                            return Err(AppError::Conflict(format!(
                                "add-on subscription {} changed during activation",
                                addon_sub.id
                            )));
                        }
                        Ok(true)
                    }
                    AddonStatus::Cancelled => Err(AppError::Conflict(format!(
                        "add-on subscription {} is cancelled and cannot be activated",
                        addon_sub.id
                    ))),
                }
            }
        }
    }
}

impl EventHandler for PaymentCaptureHandler {
    fn event_name(&self) -> &'static str {
        "payment.captured"
    }

    fn priority(&self) -> i32 {
        priority::HIGH
    }

    fn handle(&self, event: &Event, ctx: &EventContext) -> Result<EventResult> {
        let payment = &event.payment;
        let key = IdempotencyStore::generate_key(
            &payment.provider,
            "capture",
            &[&payment.event_id],
        );

        if let Some(cached) = self.idempotency.check(&key)? {
            tracing::info!(
                event_id = %payment.event_id,
                "duplicate capture event, returning cached result"
            );
            return Ok(EventResult::success_with(cached));
        }

        let invoice = self.load_invoice(ctx, &payment.invoice_reference)?;

        if invoice.status == InvoiceStatus::Paid {
            // Idempotent no-op; the delivery gets recorded as skipped.
            return Ok(EventResult::success_with(json!({
                "invoice_number": invoice.invoice_number,
                "status": "already_paid",
                "skipped": true,
            })));
        }
        if invoice.status != InvoiceStatus::Pending {
            return Err(AppError::BadRequest(msg::INVOICE_NOT_PENDING.into()));
        }

        // An absent amount is allowed (some providers omit it); a present
        // amount must match the invoice exactly.
        if let Some(amount) = payment.amount_cents {
            if amount != invoice.total_cents {
                return Err(AppError::BadRequest(format!(
                    "payment amount {} does not match invoice total {}",
                    amount, invoice.total_cents
                )));
            }
        }

        let conn = self.db.get()?;
        let line_items = queries::get_line_items(&conn, &invoice.id)?;
        let mut activated = 0usize;
        for item in &line_items {
            if self.activate_line_item(&conn, &invoice, item.item_type, &item.item_id)? {
                activated += 1;
            }
        }

        // Every item is active; the invoice flips last so a crash above
        // leaves it pending and a redelivery finishes the job.
        let paid_at = queries::now();
        if !queries::mark_invoice_paid(&conn, &invoice.id, paid_at, invoice.version)? {
            let fresh = queries::get_invoice_by_id(&conn, &invoice.id)?
                .or_not_found(msg::INVOICE_NOT_FOUND)?;
            if fresh.status != InvoiceStatus::Paid {
                return Err(AppError::Conflict(format!(
                    "invoice {} changed during capture",
                    invoice.invoice_number
                )));
            }
            // Another replica finished first; same outcome.
        }

        let result = json!({
            "invoice_id": invoice.id,
            "invoice_number": invoice.invoice_number,
            "subscription_id": invoice.subscription_id,
            "status": "paid",
            "activated_items": activated,
        });
        let stored = self.idempotency.store(&key, &result)?;

        tracing::info!(
            event_id = %payment.event_id,
            invoice = %invoice.invoice_number,
            activated,
            "payment captured"
        );
        Ok(EventResult::success_with(stored))
    }
}

/// Marks the invoice failed on a payment-failed event. Pending invoices
/// only; failed is terminal for the invoice, a later capture starts from a
/// fresh checkout.
pub struct PaymentFailedHandler {
    db: DbPool,
}

impl PaymentFailedHandler {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl EventHandler for PaymentFailedHandler {
    fn event_name(&self) -> &'static str {
        "payment.failed"
    }

    fn handle(&self, event: &Event, _ctx: &EventContext) -> Result<EventResult> {
        let payment = &event.payment;
        let conn = self.db.get()?;

        let invoice = queries::get_invoice_by_number(&conn, &payment.invoice_reference)?
            .or_not_found(msg::INVOICE_NOT_FOUND)?;

        match invoice.status {
            InvoiceStatus::Pending => {
                queries::mark_invoice_failed(&conn, &invoice.id, invoice.version)?;
                tracing::warn!(
                    event_id = %payment.event_id,
                    invoice = %invoice.invoice_number,
                    "payment failed, invoice marked failed"
                );
                Ok(EventResult::success_with(json!({
                    "invoice_number": invoice.invoice_number,
                    "status": "failed",
                })))
            }
            // Late or duplicate failure notifications change nothing.
            status => Ok(EventResult::success_with(json!({
                "invoice_number": invoice.invoice_number,
                "status": status.as_str(),
                "skipped": true,
            }))),
        }
    }
}
