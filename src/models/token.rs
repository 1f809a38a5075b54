use serde::{Deserialize, Serialize};

/// Aggregate token balance for a user. The version column is the optimistic
/// lock guarding concurrent credit/debit cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    pub user_id: String,
    pub balance: i64,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTransactionType {
    Purchase,
    Usage,
    Refund,
    Adjustment,
}

impl TokenTransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Usage => "usage",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
        }
    }
}

impl std::str::FromStr for TokenTransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "usage" => Ok(Self::Usage),
            "refund" => Ok(Self::Refund),
            "adjustment" => Ok(Self::Adjustment),
            other => Err(format!("unknown token transaction type: {other}")),
        }
    }
}

impl std::fmt::Display for TokenTransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only ledger entry. Never mutated or deleted after write;
/// `balance_after` snapshots the balance the write produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTransaction {
    pub id: String,
    pub user_id: String,
    /// Signed amount: positive for credits, negative for debits.
    pub amount: i64,
    pub tx_type: TokenTransactionType,
    pub reference_id: Option<String>,
    pub balance_after: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurchaseStatus {
    Pending,
    Completed,
}

impl TokenPurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl std::str::FromStr for TokenPurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown token purchase status: {other}")),
        }
    }
}

impl std::fmt::Display for TokenPurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pending bundle purchase created at checkout. Completed (and the tokens
/// credited) only by the payment capture handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPurchase {
    pub id: String,
    pub user_id: String,
    pub bundle_id: String,
    pub token_amount: i64,
    pub status: TokenPurchaseStatus,
    pub created_at: i64,
    pub version: i64,
}
