use serde::{Deserialize, Serialize};

/// Billing period for plans. Determines subscription duration on activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
    OneTime,
}

impl BillingPeriod {
    /// Subscription duration in days. One-time purchases never expire
    /// in practice, so they get ~100 years.
    pub fn duration_days(&self) -> i64 {
        match self {
            Self::Weekly => 7,
            Self::Monthly => 30,
            Self::Quarterly => 90,
            Self::Yearly => 365,
            Self::OneTime => 36500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
            Self::OneTime => "one_time",
        }
    }
}

impl std::str::FromStr for BillingPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            "one_time" => Ok(Self::OneTime),
            other => Err(format!("unknown billing period: {other}")),
        }
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Plan grouping. Categories with `is_single` allow at most one ACTIVE
/// subscription per user; others allow unlimited concurrent subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub is_single: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub billing_period: BillingPeriod,
    pub is_active: bool,
}

/// Prepaid token bundle purchasable alongside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBundle {
    pub id: String,
    pub name: String,
    pub token_amount: i64,
    pub price_cents: i64,
    pub currency: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOn {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub is_active: bool,
}
