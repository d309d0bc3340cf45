//! Ledger ids, transaction kinds, and charge metadata

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique charge identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChargeId(pub Uuid);

impl ChargeId {
    /// Create a new random charge ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChargeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChargeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique credit identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreditId(pub Uuid);

impl CreditId {
    /// Create a new random credit ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CreditId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CreditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of balance addition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Fulfilled external payment
    Purchase,
    /// Returned funds
    Refund,
    /// Administrative grant
    Grant,
    /// Balance moved between accounts
    Transfer,
}

impl TransactionType {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Refund => "refund",
            Self::Grant => "grant",
            Self::Transfer => "transfer",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "refund" => Ok(Self::Refund),
            "grant" => Ok(Self::Grant),
            "transfer" => Ok(Self::Transfer),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum accepted idempotency-key length
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Validate a caller-supplied idempotency key
pub fn validate_idempotency_key(key: &str) -> Result<(), IdempotencyKeyError> {
    if key.is_empty() {
        return Err(IdempotencyKeyError::Empty);
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(IdempotencyKeyError::TooLong(key.len()));
    }
    Ok(())
}

/// Idempotency-key shape violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdempotencyKeyError {
    #[error("idempotency key must be non-empty")]
    Empty,

    #[error("idempotency key is {0} bytes, max {MAX_IDEMPOTENCY_KEY_LEN}")]
    TooLong(usize),
}

/// Opaque caller context attached to a charge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Caller context attached to a credit check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCheckContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Pool that would absorb (or absorbed) a charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Complimentary account pool
    Free,
    /// Purchased account pool
    Paid,
    /// No pool can serve the charge
    None,
}

impl PoolKind {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid => "paid",
            Self::None => "none",
        }
    }
}

/// Purchase hint attached to exhaustion denials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseHint {
    /// Intent amount in minor units
    pub price_minor: i64,
    /// Credits delivered per purchase
    pub uses: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_type_round_trips() {
        for kind in [
            TransactionType::Purchase,
            TransactionType::Refund,
            TransactionType::Grant,
            TransactionType::Transfer,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionType>(), Ok(kind));
        }
    }

    #[test]
    fn transaction_type_serializes_snake_case() {
        let json = serde_json::to_string(&TransactionType::Purchase).unwrap();
        assert_eq!(json, "\"purchase\"");
    }

    #[test]
    fn idempotency_key_bounds() {
        assert!(validate_idempotency_key("c1").is_ok());
        assert_eq!(
            validate_idempotency_key(""),
            Err(IdempotencyKeyError::Empty)
        );
        let long = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        assert!(matches!(
            validate_idempotency_key(&long),
            Err(IdempotencyKeyError::TooLong(_))
        ));
    }
}
