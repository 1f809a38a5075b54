mod invoice;
mod plan;
mod subscription;
mod token;
mod webhook;

pub use invoice::{Invoice, InvoiceLineItem, InvoiceStatus, LineItemType};
pub use plan::{AddOn, BillingPeriod, Category, Plan, TokenBundle};
pub use subscription::{AddonStatus, AddonSubscription, Subscription, SubscriptionStatus};
pub use token::{
    TokenBalance, TokenPurchase, TokenPurchaseStatus, TokenTransaction, TokenTransactionType,
};
pub use webhook::{NormalizedPaymentEvent, PaymentEventType, WebhookRecord, WebhookStatus};
