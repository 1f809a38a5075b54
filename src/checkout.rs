//! Checkout: validates a purchase request and creates the pending records
//! that a later payment capture activates.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::{queries, DbPool};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::events::{Dispatcher, Event};
use crate::models::{
    Invoice, InvoiceLineItem, LineItemType, NormalizedPaymentEvent, PaymentEventType, Subscription,
};

/// Provider name used for events this service synthesizes itself.
pub const INTERNAL_PROVIDER: &str = "internal";

/// Sentinel marking the synthetic capture event for a zero-total checkout.
pub const ZERO_PRICE_REFERENCE: &str = "zero-price";

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub bundle_ids: Vec<String>,
    #[serde(default)]
    pub addon_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub subscription: Subscription,
    pub invoice: Invoice,
    pub line_items: Vec<InvoiceLineItem>,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: DbPool,
    dispatcher: Arc<Dispatcher>,
}

impl CheckoutService {
    pub fn new(db: DbPool, dispatcher: Arc<Dispatcher>) -> Self {
        Self { db, dispatcher }
    }

    /// Validate the request and create one pending subscription, one pending
    /// token purchase per bundle, one pending add-on subscription per
    /// add-on, and one pending invoice mirroring them as line items.
    ///
    /// A zero-total invoice is settled synchronously by dispatching a
    /// payment-captured event through the same path real webhooks take, so
    /// free plans exercise the exact activation logic.
    pub fn checkout(&self, request: &CheckoutRequest) -> Result<CheckoutResponse> {
        let conn = self.db.get()?;

        let plan =
            queries::get_plan_by_id(&conn, &request.plan_id)?.or_not_found(msg::PLAN_NOT_FOUND)?;
        if !plan.is_active {
            return Err(AppError::BadRequest(msg::PLAN_INACTIVE.into()));
        }

        let categories = queries::get_categories_for_plan(&conn, &plan.id)?;
        let single_category_ids: Vec<String> = categories
            .iter()
            .filter(|c| c.is_single)
            .map(|c| c.id.clone())
            .collect();
        if !single_category_ids.is_empty() {
            let existing =
                queries::find_active_subscriptions(&conn, &request.user_id, &single_category_ids)?;
            if let Some(held) = existing.first() {
                let name = categories
                    .iter()
                    .find(|c| Some(c.id.as_str()) == held.category_id.as_deref())
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| "category".to_string());
                return Err(AppError::AlreadySubscribed(format!(
                    "user already has an active subscription in single category '{name}'"
                )));
            }
        }

        // Resolve every referenced bundle and add-on before writing anything,
        // so a bad id costs zero state.
        let mut bundles = Vec::with_capacity(request.bundle_ids.len());
        for bundle_id in &request.bundle_ids {
            let bundle = queries::get_token_bundle_by_id(&conn, bundle_id)?
                .or_not_found(msg::BUNDLE_NOT_FOUND)?;
            if !bundle.is_active {
                return Err(AppError::BadRequest(format!(
                    "token bundle '{}' is not active",
                    bundle.name
                )));
            }
            bundles.push(bundle);
        }
        let mut add_ons = Vec::with_capacity(request.addon_ids.len());
        for addon_id in &request.addon_ids {
            let add_on =
                queries::get_add_on_by_id(&conn, addon_id)?.or_not_found(msg::ADDON_NOT_FOUND)?;
            if !add_on.is_active {
                return Err(AppError::BadRequest(format!(
                    "add-on '{}' is not active",
                    add_on.name
                )));
            }
            add_ons.push(add_on);
        }

        // Subscription is filed under the single category when there is one,
        // otherwise under the plan's first category.
        let category_id = single_category_ids
            .first()
            .cloned()
            .or_else(|| categories.first().map(|c| c.id.clone()));

        let tx = conn.unchecked_transaction()?;

        let subscription = queries::create_subscription(
            &tx,
            &request.user_id,
            &plan.id,
            category_id.as_deref(),
        )?;

        let mut line_items = vec![queries::CreateLineItem {
            item_type: LineItemType::Subscription,
            item_id: subscription.id.clone(),
            amount_cents: plan.price_cents,
            currency: plan.currency.clone(),
        }];

        for bundle in &bundles {
            let purchase = queries::create_token_purchase(
                &tx,
                &request.user_id,
                &bundle.id,
                bundle.token_amount,
            )?;
            line_items.push(queries::CreateLineItem {
                item_type: LineItemType::TokenBundle,
                item_id: purchase.id,
                amount_cents: bundle.price_cents,
                currency: bundle.currency.clone(),
            });
        }

        for add_on in &add_ons {
            let addon_sub =
                queries::create_addon_subscription(&tx, &request.user_id, &add_on.id)?;
            line_items.push(queries::CreateLineItem {
                item_type: LineItemType::AddOn,
                item_id: addon_sub.id,
                amount_cents: add_on.price_cents,
                currency: add_on.currency.clone(),
            });
        }

        let invoice = queries::create_invoice(
            &tx,
            &request.user_id,
            Some(&subscription.id),
            &plan.currency,
            &line_items,
        )?;

        tx.commit()?;

        // Release the connection before dispatching: the capture handler
        // acquires its own from the pool.
        drop(conn);

        if invoice.total_cents == 0 {
            self.settle_zero_price_invoice(&invoice)?;
        }

        // Re-read: the zero-price path has already activated everything.
        let conn = self.db.get()?;
        let subscription = queries::get_subscription_by_id(&conn, &subscription.id)?
            .ok_or_else(|| AppError::Internal("subscription vanished after checkout".into()))?;
        let invoice = queries::get_invoice_by_id(&conn, &invoice.id)?
            .ok_or_else(|| AppError::Internal("invoice vanished after checkout".into()))?;
        let line_items = queries::get_line_items(&conn, &invoice.id)?;

        Ok(CheckoutResponse {
            subscription,
            invoice,
            line_items,
        })
    }

    /// Activate a free checkout through the normal capture path: a
    /// synthetic payment-captured event carrying the sentinel reference
    /// goes through the same dispatcher the webhook endpoint uses.
    fn settle_zero_price_invoice(&self, invoice: &Invoice) -> Result<()> {
        let payment = NormalizedPaymentEvent {
            provider: INTERNAL_PROVIDER.to_string(),
            event_id: format!("{}:{}", ZERO_PRICE_REFERENCE, invoice.invoice_number),
            event_type: PaymentEventType::PaymentCaptured,
            invoice_reference: invoice.invoice_number.clone(),
            amount_cents: Some(0),
            currency: Some(invoice.currency.clone()),
            metadata: json!({ "reason": ZERO_PRICE_REFERENCE }),
        };

        let result = self.dispatcher.dispatch(&Event::from_payment(payment));
        if !result.success {
            return Err(AppError::Internal(format!(
                "zero-price activation failed for invoice {}: {}",
                invoice.invoice_number,
                result.errors.join("; ")
            )));
        }
        Ok(())
    }
}
