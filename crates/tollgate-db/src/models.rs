//! Database row models
//!
//! These types map directly to database rows using SQLx's FromRow derive.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Account row from the database
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    pub oauth_provider: String,
    pub external_id: String,
    pub wa_id: Option<String>,
    pub tenant_id: Option<String>,
    pub customer_email: Option<String>,
    pub display_name: Option<String>,
    pub balance_minor: i64,
    pub currency: String,
    pub plan_name: String,
    pub free_uses_remaining: i64,
    pub total_uses: i64,
    pub daily_free_uses_remaining: i64,
    pub daily_free_uses_reset_at: Option<DateTime<Utc>>,
    pub daily_free_uses_limit: i64,
    pub paid_credits: i64,
    pub status: String,
    pub marketing_opt_in: bool,
    pub marketing_opt_in_at: Option<DateTime<Utc>>,
    pub marketing_opt_in_source: Option<String>,
    pub user_role: Option<String>,
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRow {
    /// Convert to domain AccountId
    pub fn account_id(&self) -> tollgate_types::AccountId {
        tollgate_types::AccountId(self.id)
    }

    /// Convert the identity columns to a domain identity
    pub fn identity(&self) -> tollgate_types::AccountIdentity {
        tollgate_types::AccountIdentity {
            oauth_provider: self.oauth_provider.clone(),
            external_id: self.external_id.clone(),
            wa_id: self.wa_id.clone(),
            tenant_id: self.tenant_id.clone(),
        }
    }
}

/// Charge row from the database
#[derive(Debug, Clone, FromRow)]
pub struct ChargeRow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: String,
    pub idempotency_key: Option<String>,
    pub metadata_message_id: Option<String>,
    pub metadata_agent_id: Option<String>,
    pub metadata_channel_id: Option<String>,
    pub metadata_request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Credit row from the database
#[derive(Debug, Clone, FromRow)]
pub struct CreditRow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub transaction_type: String,
    pub description: String,
    pub external_transaction_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Credit-check audit row
#[derive(Debug, Clone, FromRow)]
pub struct CreditCheckRow {
    pub id: Uuid,
    pub account_id: Option<Uuid>,
    pub oauth_provider: String,
    pub external_id: String,
    pub wa_id: Option<String>,
    pub tenant_id: Option<String>,
    pub has_credit: bool,
    pub credits_remaining: Option<i64>,
    pub plan_name: Option<String>,
    pub pool: String,
    pub denial_reason: Option<String>,
    pub context_agent_id: Option<String>,
    pub context_channel_id: Option<String>,
    pub context_request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-account, per-product sub-ledger row
#[derive(Debug, Clone, FromRow)]
pub struct ProductInventoryRow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub product_type: String,
    pub free_remaining: i32,
    pub paid_credits: i32,
    pub last_daily_refresh: Option<DateTime<Utc>>,
    pub total_uses: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Product usage audit row
#[derive(Debug, Clone, FromRow)]
pub struct ProductUsageRow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub product_type: String,
    pub used_free: bool,
    pub used_paid: bool,
    pub cost_minor: i32,
    pub free_before: i32,
    pub free_after: i32,
    pub paid_before: i32,
    pub paid_after: i32,
    pub idempotency_key: Option<String>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Payment record row
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub provider: String,
    pub external_id: String,
    pub account_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub credit_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRow {
    /// Whether a credit has already been linked to this payment
    pub fn is_fulfilled(&self) -> bool {
        self.credit_id.is_some()
    }
}
