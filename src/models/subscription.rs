use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Paused,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Cancelled and expired subscriptions never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User subscription. Created pending at checkout; activated only by the
/// payment capture handler. The version column guards concurrent updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    /// Category the plan was purchased under, used for single-category
    /// enforcement at checkout time.
    pub category_id: Option<String>,
    pub status: SubscriptionStatus,
    pub started_at: Option<i64>,
    pub expires_at: Option<i64>,
    pub paused_at: Option<i64>,
    /// Plan to switch to at the next renewal, if a change was requested.
    pub pending_plan_id: Option<String>,
    pub created_at: i64,
    pub version: i64,
}

impl Subscription {
    pub fn is_valid(&self, now: i64) -> bool {
        if self.status != SubscriptionStatus::Active {
            return false;
        }
        match self.expires_at {
            Some(exp) => exp > now,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonStatus {
    Pending,
    Active,
    Cancelled,
}

impl AddonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for AddonStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown add-on status: {other}")),
        }
    }
}

impl std::fmt::Display for AddonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recurring add-on attached to a user, purchased alongside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonSubscription {
    pub id: String,
    pub user_id: String,
    pub addon_id: String,
    pub status: AddonStatus,
    pub started_at: Option<i64>,
    pub created_at: i64,
    pub version: i64,
}
