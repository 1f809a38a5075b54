use serde::{Deserialize, Serialize};

/// Storage-level dedupe guard for webhook deliveries, independent of the
/// cache-based idempotency key. UNIQUE(provider, event_id) makes the
/// "already processed" signal visible across all replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub id: String,
    pub provider: String,
    pub event_id: String,
    pub status: WebhookStatus,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Received,
    Processing,
    Processed,
    Failed,
    Skipped,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Statuses that mean the delivery already ran to completion and a
    /// duplicate must be answered without re-dispatching.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Processed | Self::Skipped)
    }
}

impl std::str::FromStr for WebhookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown webhook status: {other}")),
        }
    }
}

impl std::fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider-agnostic payment event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventType {
    PaymentCaptured,
    PaymentFailed,
    Unknown,
}

impl PaymentEventType {
    /// Dispatcher event name for this type.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::PaymentCaptured => "payment.captured",
            Self::PaymentFailed => "payment.failed",
            Self::Unknown => "payment.unknown",
        }
    }
}

/// Transient DTO produced by provider adapters: one normalized shape for
/// every provider's webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedPaymentEvent {
    pub provider: String,
    pub event_id: String,
    pub event_type: PaymentEventType,
    /// Invoice number the payment settles, or a sentinel such as
    /// "zero-price" for synthetic events.
    pub invoice_reference: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}
