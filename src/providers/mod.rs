mod mock;
mod paypal;
pub mod retry;
mod stripe;

pub use mock::MockAdapter;
pub use paypal::PayPalAdapter;
pub use stripe::StripeAdapter;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::models::NormalizedPaymentEvent;

/// Payment provider adapter: signature verification plus normalization of
/// provider payloads into `NormalizedPaymentEvent`. Implementations are
/// substitutable behind this trait and selected at runtime by name.
pub trait ProviderAdapter: Send + Sync {
    /// Provider name used for routing and storage (e.g. "stripe").
    fn name(&self) -> &'static str;

    /// HTTP header the provider delivers its signature in.
    fn signature_header(&self) -> &'static str;

    /// Verify the payload signature against the configured secret.
    fn verify_signature(&self, payload: &[u8], signature: &str, secret: &str) -> Result<bool>;

    /// Parse the raw payload into a provider-agnostic payment event.
    fn parse_event(&self, payload: &[u8]) -> Result<NormalizedPaymentEvent>;
}

/// Registry of provider adapters keyed by provider name.
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<&'static str, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MockAdapter));
        registry.register(Arc::new(StripeAdapter));
        registry.register(Arc::new(PayPalAdapter));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn providers(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }
}

/// Parse a decimal money string ("39.00") into cents without going through
/// floating point. Accepts at most two fractional digits.
pub(crate) fn parse_decimal_cents(s: &str) -> Option<i64> {
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if frac.len() > 2 {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac_cents: i64 = if frac.is_empty() {
        0
    } else {
        // "5" means 50 cents
        let padded = format!("{:0<2}", frac);
        padded.parse().ok()?
    };
    if whole < 0 {
        Some(whole * 100 - frac_cents)
    } else {
        Some(whole * 100 + frac_cents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_by_name() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.has("mock"));
        assert!(registry.has("stripe"));
        assert!(registry.has("paypal"));
        assert!(!registry.has("square"));
        assert_eq!(registry.get("stripe").unwrap().name(), "stripe");
    }

    #[test]
    fn decimal_cents_parsing() {
        assert_eq!(parse_decimal_cents("39.00"), Some(3900));
        assert_eq!(parse_decimal_cents("29"), Some(2900));
        assert_eq!(parse_decimal_cents("0.5"), Some(50));
        assert_eq!(parse_decimal_cents("10.99"), Some(1099));
        assert_eq!(parse_decimal_cents("1.999"), None);
        assert_eq!(parse_decimal_cents("abc"), None);
    }
}
