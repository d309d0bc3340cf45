//! Payment provider abstraction

use async_trait::async_trait;
use tollgate_types::{AccountId, AccountIdentity};

use crate::error::LedgerError;

/// Provider-agnostic payment intent request
#[derive(Debug, Clone)]
pub struct PaymentIntentSpec {
    /// Intent amount in minor units
    pub amount_minor: i64,
    /// Three-letter currency code
    pub currency: String,
    /// Human-readable purchase description
    pub description: String,
    /// Receipt email, when known
    pub customer_email: Option<String>,
    /// Ledger account the purchase belongs to
    pub account_id: AccountId,
    /// Identity propagated into provider metadata so webhooks can find the
    /// account without a database lookup
    pub oauth_provider: String,
    pub external_id: String,
    /// Provider-side idempotency key
    pub idempotency_key: String,
}

/// Provider-side view of a payment
#[derive(Debug, Clone)]
pub struct PaymentHandle {
    /// Provider-specific payment id
    pub payment_id: String,
    /// Secret for client-side confirmation
    pub client_secret: String,
    /// Provider status string
    pub status: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Verified webhook event, normalised across providers
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Payment completed; credit the account
    PaymentSucceeded {
        event_id: String,
        external_id: String,
        amount_minor: Option<i64>,
        currency: Option<String>,
        identity: Option<AccountIdentity>,
    },
    /// Payment failed; no ledger effect
    PaymentFailed {
        event_id: String,
        external_id: String,
        reason: Option<String>,
    },
    /// Provider-initiated refund; logged only
    Refund {
        event_id: String,
        external_id: String,
        amount_minor: Option<i64>,
    },
    /// Verified but irrelevant event kind
    Ignored { event_id: String, kind: String },
}

impl ProviderEvent {
    /// Event id for logging
    pub fn event_id(&self) -> &str {
        match self {
            Self::PaymentSucceeded { event_id, .. }
            | Self::PaymentFailed { event_id, .. }
            | Self::Refund { event_id, .. }
            | Self::Ignored { event_id, .. } => event_id,
        }
    }
}

/// Payment provider capability surface
///
/// One implementation per external provider, selected at startup and handed
/// to the purchase handler and the webhook reconciler as a capability value.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Provider name used to namespace payment records
    fn name(&self) -> &'static str;

    /// Create a payment intent
    async fn create_payment_intent(
        &self,
        spec: &PaymentIntentSpec,
    ) -> Result<PaymentHandle, LedgerError>;

    /// Current provider-side status of a payment; may be polled
    async fn get_payment_status(&self, payment_id: &str) -> Result<PaymentHandle, LedgerError>;

    /// Whether the payment has completed
    async fn confirm_payment(&self, payment_id: &str) -> Result<bool, LedgerError>;

    /// Verify a webhook delivery and parse it into an event
    ///
    /// Must reject on signature mismatch before any side effect.
    async fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<ProviderEvent, LedgerError>;

    /// Refund a payment, in full when no amount is given
    async fn refund_payment(
        &self,
        payment_id: &str,
        amount_minor: Option<i64>,
    ) -> Result<String, LedgerError>;
}
