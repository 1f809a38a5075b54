use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{msg, AppError, Result};
use crate::models::{NormalizedPaymentEvent, PaymentEventType};

use super::ProviderAdapter;

type HmacSha256 = Hmac<Sha256>;

/// Stripe webhook adapter. Signature header format: `t=timestamp,v1=hex`.
pub struct StripeAdapter;

/// Maximum age of a webhook timestamp before it's rejected, per Stripe's
/// recommendation of 5 minutes.
const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Clock-skew tolerance for timestamps claiming to be from the future.
const FUTURE_SKEW_TOLERANCE_SECS: i64 = 60;

#[derive(Deserialize)]
struct StripeEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeData,
}

#[derive(Deserialize)]
struct StripeData {
    object: StripeObject,
}

#[derive(Deserialize)]
struct StripeObject {
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

impl ProviderAdapter for StripeAdapter {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn signature_header(&self) -> &'static str {
        "stripe-signature"
    }

    fn verify_signature(&self, payload: &[u8], signature: &str, secret: &str) -> Result<bool> {
        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in signature.split(',') {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        // Reject stale timestamps to prevent replay of captured signatures.
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let now = chrono::Utc::now().timestamp();
        let age = now - timestamp;

        if age > WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        if age < -FUTURE_SKEW_TOLERANCE_SECS {
            tracing::warn!("stripe webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        // Signed payload is `{timestamp}.{raw body}` over the raw bytes;
        // the body is never run through a UTF-8 conversion.
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal("invalid webhook secret".into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison; signature length is not secret.
        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();
        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }
        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }

    fn parse_event(&self, payload: &[u8]) -> Result<NormalizedPaymentEvent> {
        let envelope: StripeEnvelope = serde_json::from_slice(payload)
            .map_err(|e| AppError::BadRequest(format!("malformed stripe payload: {e}")))?;

        let event_type = match envelope.event_type.as_str() {
            "checkout.session.completed" | "invoice.paid" | "payment_intent.succeeded" => {
                PaymentEventType::PaymentCaptured
            }
            "invoice.payment_failed" | "payment_intent.payment_failed" => {
                PaymentEventType::PaymentFailed
            }
            _ => PaymentEventType::Unknown,
        };

        // The invoice number travels in checkout metadata so the capture
        // handler can find its invoice without provider-specific lookups.
        let invoice_reference = envelope
            .data
            .object
            .metadata
            .get("invoice_reference")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(NormalizedPaymentEvent {
            provider: self.name().to_string(),
            event_id: envelope.id,
            event_type,
            invoice_reference,
            amount_cents: envelope.data.object.amount_total,
            currency: envelope.data.object.currency.map(|c| c.to_uppercase()),
            metadata: envelope.data.object.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], secret: &str, timestamp: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_accepted() {
        let payload = br#"{"type":"invoice.paid"}"#;
        let ts = chrono::Utc::now().timestamp().to_string();
        let header = format!("t={},v1={}", ts, sign(payload, "whsec_test", &ts));
        assert!(StripeAdapter
            .verify_signature(payload, &header, "whsec_test")
            .unwrap());
    }

    #[test]
    fn non_utf8_payload_verifies_over_raw_bytes() {
        let payload: &[u8] = &[b'{', 0xff, 0xfe, b'}'];
        let ts = chrono::Utc::now().timestamp().to_string();
        let header = format!("t={},v1={}", ts, sign(payload, "whsec_test", &ts));
        assert!(StripeAdapter
            .verify_signature(payload, &header, "whsec_test")
            .unwrap());
    }

    #[test]
    fn wrong_secret_rejected() {
        let payload = br#"{"type":"invoice.paid"}"#;
        let ts = chrono::Utc::now().timestamp().to_string();
        let header = format!("t={},v1={}", ts, sign(payload, "whsec_other", &ts));
        assert!(!StripeAdapter
            .verify_signature(payload, &header, "whsec_test")
            .unwrap());
    }

    #[test]
    fn stale_timestamp_rejected() {
        let payload = br#"{"type":"invoice.paid"}"#;
        let ts = (chrono::Utc::now().timestamp() - 600).to_string();
        let header = format!("t={},v1={}", ts, sign(payload, "whsec_test", &ts));
        assert!(!StripeAdapter
            .verify_signature(payload, &header, "whsec_test")
            .unwrap());
    }

    #[test]
    fn malformed_header_is_error() {
        let payload = br#"{}"#;
        let result = StripeAdapter.verify_signature(payload, "garbage", "whsec_test");
        assert!(result.is_err());
    }

    #[test]
    fn parses_checkout_completed() {
        let payload = br#"{
            "id": "evt_stripe_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "amount_total": 3900,
                "currency": "usd",
                "metadata": {"invoice_reference": "INV-20260831-abcd1234"}
            }}
        }"#;
        let event = StripeAdapter.parse_event(payload).unwrap();
        assert_eq!(event.event_type, PaymentEventType::PaymentCaptured);
        assert_eq!(event.invoice_reference, "INV-20260831-abcd1234");
        assert_eq!(event.amount_cents, Some(3900));
        assert_eq!(event.currency.as_deref(), Some("USD"));
    }
}
