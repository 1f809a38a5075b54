//! Mock provider for tests and local development.
//!
//! Uses a plain hex HMAC-SHA256 over the payload as its signature scheme,
//! so tests can produce valid signatures deterministically.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::models::{NormalizedPaymentEvent, PaymentEventType};

use super::ProviderAdapter;

type HmacSha256 = Hmac<Sha256>;

pub struct MockAdapter;

/// Expected payload shape:
/// `{"id": "evt_1", "type": "payment.captured", "data": {...}}`
#[derive(Deserialize)]
struct MockPayload {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: MockData,
}

#[derive(Deserialize, Default)]
struct MockData {
    #[serde(default)]
    invoice_reference: Option<String>,
    #[serde(default)]
    amount_cents: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

impl MockAdapter {
    pub fn sign(payload: &[u8], secret: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn signature_header(&self) -> &'static str {
        "x-mock-signature"
    }

    fn verify_signature(&self, payload: &[u8], signature: &str, secret: &str) -> Result<bool> {
        let expected = Self::sign(payload, secret);
        let expected = expected.as_bytes();
        let provided = signature.as_bytes();
        if expected.len() != provided.len() {
            return Ok(false);
        }
        Ok(expected.ct_eq(provided).into())
    }

    fn parse_event(&self, payload: &[u8]) -> Result<NormalizedPaymentEvent> {
        let parsed: MockPayload = serde_json::from_slice(payload)
            .map_err(|e| AppError::BadRequest(format!("malformed mock payload: {e}")))?;

        let event_type = match parsed.event_type.as_str() {
            "payment.captured" | "payment.succeeded" => PaymentEventType::PaymentCaptured,
            "payment.failed" => PaymentEventType::PaymentFailed,
            _ => PaymentEventType::Unknown,
        };

        Ok(NormalizedPaymentEvent {
            provider: self.name().to_string(),
            event_id: parsed.id,
            event_type,
            invoice_reference: parsed.data.invoice_reference.unwrap_or_default(),
            amount_cents: parsed.data.amount_cents,
            currency: parsed.data.currency,
            metadata: parsed.data.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_its_own_signature() {
        let payload = br#"{"id":"evt_1","type":"payment.captured"}"#;
        let sig = MockAdapter::sign(payload, "secret");
        assert!(MockAdapter
            .verify_signature(payload, &sig, "secret")
            .unwrap());
        assert!(!MockAdapter
            .verify_signature(payload, &sig, "other-secret")
            .unwrap());
    }

    #[test]
    fn parses_capture_event() {
        let payload = br#"{
            "id": "evt_42",
            "type": "payment.captured",
            "data": {"invoice_reference": "INV-1", "amount_cents": 3900, "currency": "USD"}
        }"#;
        let event = MockAdapter.parse_event(payload).unwrap();
        assert_eq!(event.event_id, "evt_42");
        assert_eq!(event.event_type, PaymentEventType::PaymentCaptured);
        assert_eq!(event.invoice_reference, "INV-1");
        assert_eq!(event.amount_cents, Some(3900));
    }

    #[test]
    fn unknown_type_is_preserved() {
        let payload = br#"{"id":"evt_9","type":"customer.updated"}"#;
        let event = MockAdapter.parse_event(payload).unwrap();
        assert_eq!(event.event_type, PaymentEventType::Unknown);
    }
}
