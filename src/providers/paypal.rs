use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::models::{NormalizedPaymentEvent, PaymentEventType};

use super::{parse_decimal_cents, ProviderAdapter};

type HmacSha256 = Hmac<Sha256>;

/// PayPal webhook adapter. Signature is a base64 HMAC-SHA256 of the raw
/// payload delivered in the transmission-sig header.
pub struct PayPalAdapter;

#[derive(Deserialize)]
struct PayPalEnvelope {
    id: String,
    event_type: String,
    #[serde(default)]
    resource: PayPalResource,
}

#[derive(Deserialize, Default)]
struct PayPalResource {
    #[serde(default)]
    invoice_id: Option<String>,
    #[serde(default)]
    amount: Option<PayPalAmount>,
}

#[derive(Deserialize)]
struct PayPalAmount {
    /// Decimal string, e.g. "39.00".
    total: String,
    currency: String,
}

impl PayPalAdapter {
    pub fn sign(payload: &[u8], secret: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(payload);
        BASE64.encode(mac.finalize().into_bytes())
    }
}

impl ProviderAdapter for PayPalAdapter {
    fn name(&self) -> &'static str {
        "paypal"
    }

    fn signature_header(&self) -> &'static str {
        "paypal-transmission-sig"
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
        let envelope: PayPalEnvelope = serde_json::from_slice(payload)
            .map_err(|e| AppError::BadRequest(format!("malformed paypal payload: {e}")))?;

        let event_type = match envelope.event_type.as_str() {
            "PAYMENT.CAPTURE.COMPLETED" | "CHECKOUT.ORDER.COMPLETED" => {
                PaymentEventType::PaymentCaptured
            }
            "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => {
                PaymentEventType::PaymentFailed
            }
            _ => PaymentEventType::Unknown,
        };

        let (amount_cents, currency) = match &envelope.resource.amount {
            Some(amount) => {
                let cents = parse_decimal_cents(&amount.total).ok_or_else(|| {
                    AppError::BadRequest(format!("invalid paypal amount: {}", amount.total))
                })?;
                (Some(cents), Some(amount.currency.to_uppercase()))
            }
            None => (None, None),
        };

        Ok(NormalizedPaymentEvent {
            provider: self.name().to_string(),
            event_id: envelope.id,
            event_type,
            invoice_reference: envelope.resource.invoice_id.unwrap_or_default(),
            amount_cents,
            currency,
            metadata: serde_json::Value::Null,
        })
    }
}
