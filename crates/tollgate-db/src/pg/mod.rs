//! PostgreSQL ledger store implementation

mod tx;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::*;
use crate::store::*;

pub use tx::PgLedgerTx;

pub(crate) const ACCOUNT_COLS: &str = "id, oauth_provider, external_id, wa_id, tenant_id, \
     customer_email, display_name, balance_minor, currency, plan_name, \
     free_uses_remaining, total_uses, daily_free_uses_remaining, \
     daily_free_uses_reset_at, daily_free_uses_limit, paid_credits, status, \
     marketing_opt_in, marketing_opt_in_at, marketing_opt_in_source, \
     user_role, agent_id, created_at, updated_at";

pub(crate) const CHARGE_COLS: &str = "id, account_id, amount_minor, currency, balance_before, \
     balance_after, description, idempotency_key, metadata_message_id, \
     metadata_agent_id, metadata_channel_id, metadata_request_id, created_at";

pub(crate) const CREDIT_COLS: &str = "id, account_id, amount_minor, currency, balance_before, \
     balance_after, transaction_type, description, external_transaction_id, \
     idempotency_key, created_at";

pub(crate) const INVENTORY_COLS: &str = "id, account_id, product_type, free_remaining, \
     paid_credits, last_daily_refresh, total_uses, created_at, updated_at";

pub(crate) const PRODUCT_USAGE_COLS: &str = "id, account_id, product_type, used_free, used_paid, \
     cost_minor, free_before, free_after, paid_before, paid_after, \
     idempotency_key, request_id, created_at";

pub(crate) const PAYMENT_COLS: &str = "id, provider, external_id, account_id, amount_minor, \
     currency, status, credit_id, created_at, updated_at";

/// PostgreSQL ledger store
///
/// Writes and mutation-decision reads go to the primary. The optional read
/// replica serves authorisation-decision reads only, falling back to the
/// primary when unreachable.
#[derive(Clone)]
pub struct PgLedgerStore {
    primary: PgPool,
    replica: Option<PgPool>,
}

impl PgLedgerStore {
    /// Create a store over the primary pool
    pub fn new(primary: PgPool) -> Self {
        Self {
            primary,
            replica: None,
        }
    }

    /// Attach a read replica
    pub fn with_replica(mut self, replica: PgPool) -> Self {
        self.replica = Some(replica);
        self
    }

    /// Primary pool, exposed for health checks
    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    async fn fetch_account_on(
        pool: &PgPool,
        oauth_provider: &str,
        external_id: &str,
    ) -> DbResult<Option<AccountRow>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLS} FROM accounts WHERE oauth_provider = $1 AND external_id = $2"
        );
        let account = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(oauth_provider)
            .bind(external_id)
            .fetch_optional(pool)
            .await?;
        Ok(account)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn find_account_by_identity(
        &self,
        oauth_provider: &str,
        external_id: &str,
    ) -> DbResult<Option<AccountRow>> {
        Self::fetch_account_on(&self.primary, oauth_provider, external_id).await
    }

    async fn read_account_by_identity(
        &self,
        oauth_provider: &str,
        external_id: &str,
    ) -> DbResult<Option<AccountRow>> {
        if let Some(replica) = &self.replica {
            match Self::fetch_account_on(replica, oauth_provider, external_id).await {
                Ok(row) => return Ok(row),
                Err(err) if err.is_unavailable() => {
                    tracing::warn!(error = %err, "read replica unreachable, falling back to primary");
                }
                Err(err) => return Err(err),
            }
        }
        Self::fetch_account_on(&self.primary, oauth_provider, external_id).await
    }

    async fn find_account_by_id(&self, id: Uuid) -> DbResult<Option<AccountRow>> {
        let sql = format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE id = $1");
        let account = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.primary)
            .await?;
        Ok(account)
    }

    async fn upsert_account(&self, account: NewAccount) -> DbResult<AccountRow> {
        let sql = format!(
            r#"
            INSERT INTO accounts (
                id, oauth_provider, external_id, wa_id, tenant_id,
                customer_email, display_name, balance_minor, currency, plan_name,
                free_uses_remaining, daily_free_uses_remaining,
                daily_free_uses_limit, status, marketing_opt_in,
                marketing_opt_in_at, marketing_opt_in_source, user_role, agent_id
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                CASE WHEN $15 THEN NOW() ELSE NULL END, $16, $17, $18
            )
            ON CONFLICT (oauth_provider, external_id) DO NOTHING
            RETURNING {ACCOUNT_COLS}
            "#
        );
        let inserted = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(account.id)
            .bind(&account.oauth_provider)
            .bind(&account.external_id)
            .bind(&account.wa_id)
            .bind(&account.tenant_id)
            .bind(&account.customer_email)
            .bind(&account.display_name)
            .bind(account.balance_minor)
            .bind(&account.currency)
            .bind(&account.plan_name)
            .bind(account.free_uses_remaining)
            .bind(account.daily_free_uses_remaining)
            .bind(account.daily_free_uses_limit)
            .bind(&account.status)
            .bind(account.marketing_opt_in)
            .bind(&account.marketing_opt_in_source)
            .bind(&account.user_role)
            .bind(&account.agent_id)
            .fetch_optional(&self.primary)
            .await?;

        if let Some(row) = inserted {
            return Ok(row);
        }

        // Lost the insert race; the existing row is canonical.
        Self::fetch_account_on(&self.primary, &account.oauth_provider, &account.external_id)
            .await?
            .ok_or(DbError::NotFound)
    }

    async fn update_profile(&self, account_id: Uuid, patch: ProfilePatch) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE accounts SET
                customer_email = COALESCE(customer_email, $2),
                display_name = COALESCE(display_name, $3),
                marketing_opt_in_at = CASE
                    WHEN NOT marketing_opt_in AND $4 THEN NOW()
                    ELSE marketing_opt_in_at
                END,
                marketing_opt_in = marketing_opt_in OR $4,
                marketing_opt_in_source = COALESCE(marketing_opt_in_source, $5),
                user_role = COALESCE(user_role, $6),
                agent_id = COALESCE(agent_id, $7),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(&patch.customer_email)
        .bind(&patch.display_name)
        .bind(patch.marketing_opt_in)
        .bind(&patch.marketing_opt_in_source)
        .bind(&patch.user_role)
        .bind(&patch.agent_id)
        .execute(&self.primary)
        .await?;
        Ok(())
    }

    async fn find_charge_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<ChargeRow>> {
        let sql = format!(
            "SELECT {CHARGE_COLS} FROM charges WHERE account_id = $1 AND idempotency_key = $2"
        );
        let charge = sqlx::query_as::<_, ChargeRow>(&sql)
            .bind(account_id)
            .bind(key)
            .fetch_optional(&self.primary)
            .await?;
        Ok(charge)
    }

    async fn find_credit_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<CreditRow>> {
        let sql = format!(
            "SELECT {CREDIT_COLS} FROM credits WHERE account_id = $1 AND idempotency_key = $2"
        );
        let credit = sqlx::query_as::<_, CreditRow>(&sql)
            .bind(account_id)
            .bind(key)
            .fetch_optional(&self.primary)
            .await?;
        Ok(credit)
    }

    async fn find_product_usage_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<ProductUsageRow>> {
        let sql = format!(
            "SELECT {PRODUCT_USAGE_COLS} FROM product_usage_logs \
             WHERE account_id = $1 AND idempotency_key = $2"
        );
        let usage = sqlx::query_as::<_, ProductUsageRow>(&sql)
            .bind(account_id)
            .bind(key)
            .fetch_optional(&self.primary)
            .await?;
        Ok(usage)
    }

    async fn find_product_inventory(
        &self,
        account_id: Uuid,
        product_type: &str,
    ) -> DbResult<Option<ProductInventoryRow>> {
        let sql = format!(
            "SELECT {INVENTORY_COLS} FROM product_inventory \
             WHERE account_id = $1 AND product_type = $2"
        );
        let inventory = sqlx::query_as::<_, ProductInventoryRow>(&sql)
            .bind(account_id)
            .bind(product_type)
            .fetch_optional(&self.primary)
            .await?;
        Ok(inventory)
    }

    async fn find_payment_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> DbResult<Option<PaymentRow>> {
        let sql =
            format!("SELECT {PAYMENT_COLS} FROM payments WHERE provider = $1 AND external_id = $2");
        let payment = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(provider)
            .bind(external_id)
            .fetch_optional(&self.primary)
            .await?;
        Ok(payment)
    }

    async fn insert_payment(&self, payment: NewPayment) -> DbResult<PaymentRow> {
        let sql = format!(
            r#"
            INSERT INTO payments (id, provider, external_id, account_id, amount_minor, currency, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PAYMENT_COLS}
            "#
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.id)
            .bind(&payment.provider)
            .bind(&payment.external_id)
            .bind(payment.account_id)
            .bind(payment.amount_minor)
            .bind(&payment.currency)
            .bind(&payment.status)
            .fetch_one(&self.primary)
            .await?;
        Ok(row)
    }

    async fn update_payment(
        &self,
        payment_id: Uuid,
        status: &str,
        credit_id: Option<Uuid>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, credit_id = COALESCE($3, credit_id), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(payment_id)
        .bind(status)
        .bind(credit_id)
        .execute(&self.primary)
        .await?;
        Ok(())
    }

    async fn insert_credit_check(&self, check: NewCreditCheck) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO credit_checks (
                id, account_id, oauth_provider, external_id, wa_id, tenant_id,
                has_credit, credits_remaining, plan_name, pool, denial_reason,
                context_agent_id, context_channel_id, context_request_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(check.account_id)
        .bind(&check.oauth_provider)
        .bind(&check.external_id)
        .bind(&check.wa_id)
        .bind(&check.tenant_id)
        .bind(check.has_credit)
        .bind(check.credits_remaining)
        .bind(&check.plan_name)
        .bind(&check.pool)
        .bind(&check.denial_reason)
        .bind(&check.context_agent_id)
        .bind(&check.context_channel_id)
        .bind(&check.context_request_id)
        .execute(&self.primary)
        .await?;
        Ok(())
    }

    async fn begin(&self) -> DbResult<Box<dyn LedgerTx>> {
        let tx = self.primary.begin().await?;
        Ok(Box::new(PgLedgerTx::new(tx)))
    }
}
