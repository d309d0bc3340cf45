//! Ledger engine errors

use thiserror::Error;
use tollgate_db::DbError;
use tollgate_types::PurchaseHint;

/// Ledger engine errors
///
/// The engine surfaces typed variants; the HTTP surface is the only place
/// these are mapped onto status codes. Idempotency replays are not errors:
/// they come back as `Duplicate` outcomes.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Malformed identity, non-positive amount, oversize key
    #[error("validation error: {0}")]
    Validation(String),

    /// Account doesn't exist
    #[error("account not found")]
    AccountNotFound,

    /// Account is suspended
    #[error("account suspended: {0}")]
    AccountSuspended(String),

    /// Account is closed
    #[error("account is closed")]
    AccountClosed,

    /// No pool can cover the charge
    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits {
        balance: i64,
        required: i64,
        hint: Option<PurchaseHint>,
    },

    /// Post-insert read-back disagreed with intent
    #[error("write verification failed: {0}")]
    WriteVerification(String),

    /// Persisted state violates an invariant
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Payment provider call failed
    #[error("payment provider error: {0}")]
    Provider(String),

    /// Webhook signature rejected
    #[error("webhook signature invalid: {0}")]
    SignatureInvalid(String),

    /// Database unreachable or pool exhausted
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Other database error
    #[error("database error: {0}")]
    Database(DbError),
}

impl LedgerError {
    /// Whether a retry with backoff is reasonable
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Provider(_))
    }
}

// Pool exhaustion and lost connections surface as Unavailable so callers
// can retry with backoff; everything else stays a database error.
impl From<DbError> for LedgerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Unavailable(msg) => Self::Unavailable(msg),
            DbError::CheckViolation(msg) => Self::DataIntegrity(msg),
            other => Self::Database(other),
        }
    }
}

/// Result type alias for engine operations
pub type LedgerResult<T> = Result<T, LedgerError>;
