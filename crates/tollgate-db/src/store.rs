//! Ledger store traits
//!
//! `LedgerStore` is the non-transactional surface: identity lookups, upserts,
//! idempotency-replay reads, and audit appends. `LedgerTx` is the mutation
//! surface inside a single transaction; the account row lock it takes is the
//! only lock held across database round-trips. Dropping a `LedgerTx` without
//! committing rolls the transaction back, so cancellation before commit never
//! leaves a partial write behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DbResult;
use crate::models::*;

/// New-account insert input
#[derive(Debug, Clone)]
pub struct NewAccount {
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
    pub daily_free_uses_remaining: i64,
    pub daily_free_uses_limit: i64,
    pub status: String,
    pub marketing_opt_in: bool,
    pub marketing_opt_in_source: Option<String>,
    pub user_role: Option<String>,
    pub agent_id: Option<String>,
}

/// Fill-if-absent profile update
///
/// Optionals only ever fill NULL columns; `marketing_opt_in` can only turn
/// on, never off.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub customer_email: Option<String>,
    pub display_name: Option<String>,
    pub marketing_opt_in: bool,
    pub marketing_opt_in_source: Option<String>,
    pub user_role: Option<String>,
    pub agent_id: Option<String>,
}

/// New-charge insert input
#[derive(Debug, Clone)]
pub struct NewCharge {
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
}

/// New-credit insert input
#[derive(Debug, Clone)]
pub struct NewCredit {
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
}

/// Credit-check audit append input
#[derive(Debug, Clone)]
pub struct NewCreditCheck {
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
}

/// Product usage append input
#[derive(Debug, Clone)]
pub struct NewProductUsage {
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
}

/// New payment-record insert input
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub provider: String,
    pub external_id: String,
    pub account_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
}

/// Absolute balance values written under the row lock
#[derive(Debug, Clone, Copy)]
pub struct AccountBalanceUpdate {
    pub account_id: Uuid,
    pub paid_credits: i64,
    pub free_uses_remaining: i64,
    pub daily_free_uses_remaining: i64,
    pub daily_free_uses_reset_at: Option<DateTime<Utc>>,
    pub balance_minor: i64,
    pub total_uses: i64,
}

/// Absolute inventory values written under the row lock
#[derive(Debug, Clone)]
pub struct InventoryUpdate {
    pub account_id: Uuid,
    pub product_type: String,
    pub free_remaining: i32,
    pub paid_credits: i32,
    pub total_uses: i64,
    pub last_daily_refresh: Option<DateTime<Utc>>,
}

/// Non-transactional store surface
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Find an account by its identity pair, on the primary
    async fn find_account_by_identity(
        &self,
        oauth_provider: &str,
        external_id: &str,
    ) -> DbResult<Option<AccountRow>>;

    /// Identity lookup for reads that take no part in a mutation
    ///
    /// May be served by a read replica; implementations fall back to the
    /// primary when the replica is unreachable.
    async fn read_account_by_identity(
        &self,
        oauth_provider: &str,
        external_id: &str,
    ) -> DbResult<Option<AccountRow>> {
        self.find_account_by_identity(oauth_provider, external_id)
            .await
    }

    /// Find an account by primary key
    async fn find_account_by_id(&self, id: Uuid) -> DbResult<Option<AccountRow>>;

    /// Insert the account if absent, returning the canonical row
    ///
    /// Never modifies an existing row.
    async fn upsert_account(&self, account: NewAccount) -> DbResult<AccountRow>;

    /// Fill absent profile columns on an existing account
    async fn update_profile(&self, account_id: Uuid, patch: ProfilePatch) -> DbResult<()>;

    /// Replay lookup for charges
    async fn find_charge_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<ChargeRow>>;

    /// Replay lookup for credits
    async fn find_credit_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<CreditRow>>;

    /// Replay lookup for product usage
    async fn find_product_usage_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<ProductUsageRow>>;

    /// Read a product inventory row without locking
    async fn find_product_inventory(
        &self,
        account_id: Uuid,
        product_type: &str,
    ) -> DbResult<Option<ProductInventoryRow>>;

    /// Look up a payment record in the provider's namespace
    async fn find_payment_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> DbResult<Option<PaymentRow>>;

    /// Record a new payment
    async fn insert_payment(&self, payment: NewPayment) -> DbResult<PaymentRow>;

    /// Advance a payment record's state, optionally linking the credit
    async fn update_payment(
        &self,
        payment_id: Uuid,
        status: &str,
        credit_id: Option<Uuid>,
    ) -> DbResult<()>;

    /// Append an authorisation decision to the audit log
    async fn insert_credit_check(&self, check: NewCreditCheck) -> DbResult<()>;

    /// Open a mutation transaction
    async fn begin(&self) -> DbResult<Box<dyn LedgerTx>>;
}

/// Mutation surface inside one transaction
#[async_trait]
pub trait LedgerTx: Send {
    /// Lock the account row exclusively until commit or rollback
    async fn lock_account(&mut self, account_id: Uuid) -> DbResult<Option<AccountRow>>;

    /// Re-read the account inside the transaction (write verification)
    async fn get_account(&mut self, account_id: Uuid) -> DbResult<Option<AccountRow>>;

    /// Write new balance values for the locked account
    async fn update_account_balances(&mut self, update: AccountBalanceUpdate) -> DbResult<()>;

    /// Append a charge
    async fn insert_charge(&mut self, charge: NewCharge) -> DbResult<()>;

    /// Re-read a charge by primary key (write verification)
    async fn get_charge(&mut self, charge_id: Uuid) -> DbResult<Option<ChargeRow>>;

    /// Append a credit
    async fn insert_credit(&mut self, credit: NewCredit) -> DbResult<()>;

    /// Re-read a credit by primary key (write verification)
    async fn get_credit(&mut self, credit_id: Uuid) -> DbResult<Option<CreditRow>>;

    /// Lock the inventory row, creating it with the seed if absent
    async fn lock_or_create_inventory(
        &mut self,
        account_id: Uuid,
        product_type: &str,
        seed_free: i32,
    ) -> DbResult<ProductInventoryRow>;

    /// Re-read an inventory row inside the transaction (write verification)
    async fn get_inventory(
        &mut self,
        account_id: Uuid,
        product_type: &str,
    ) -> DbResult<Option<ProductInventoryRow>>;

    /// Write new values for the locked inventory row
    async fn update_inventory(&mut self, update: InventoryUpdate) -> DbResult<()>;

    /// Append a product usage log row
    async fn insert_product_usage(&mut self, usage: NewProductUsage) -> DbResult<()>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> DbResult<()>;

    /// Roll the transaction back explicitly
    async fn rollback(self: Box<Self>) -> DbResult<()>;
}
