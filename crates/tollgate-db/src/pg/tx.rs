//! Transactional mutation surface over a pooled connection
//!
//! The wrapped transaction owns its connection; dropping it without commit
//! rolls back, which is what makes cancellation before commit equivalent to
//! rollback.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::DbResult;
use crate::models::*;
use crate::store::*;

use super::{ACCOUNT_COLS, CHARGE_COLS, CREDIT_COLS, INVENTORY_COLS};

/// PostgreSQL mutation transaction
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

impl PgLedgerTx {
    pub(crate) fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_account(&mut self, account_id: Uuid) -> DbResult<Option<AccountRow>> {
        let sql = format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE id = $1 FOR UPDATE");
        let account = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(account_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(account)
    }

    async fn get_account(&mut self, account_id: Uuid) -> DbResult<Option<AccountRow>> {
        let sql = format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE id = $1");
        let account = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(account_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(account)
    }

    async fn update_account_balances(&mut self, update: AccountBalanceUpdate) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET paid_credits = $2,
                free_uses_remaining = $3,
                daily_free_uses_remaining = $4,
                daily_free_uses_reset_at = $5,
                balance_minor = $6,
                total_uses = $7,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(update.account_id)
        .bind(update.paid_credits)
        .bind(update.free_uses_remaining)
        .bind(update.daily_free_uses_remaining)
        .bind(update.daily_free_uses_reset_at)
        .bind(update.balance_minor)
        .bind(update.total_uses)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_charge(&mut self, charge: NewCharge) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO charges (
                id, account_id, amount_minor, currency, balance_before, balance_after,
                description, idempotency_key, metadata_message_id, metadata_agent_id,
                metadata_channel_id, metadata_request_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(charge.id)
        .bind(charge.account_id)
        .bind(charge.amount_minor)
        .bind(&charge.currency)
        .bind(charge.balance_before)
        .bind(charge.balance_after)
        .bind(&charge.description)
        .bind(&charge.idempotency_key)
        .bind(&charge.metadata_message_id)
        .bind(&charge.metadata_agent_id)
        .bind(&charge.metadata_channel_id)
        .bind(&charge.metadata_request_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_charge(&mut self, charge_id: Uuid) -> DbResult<Option<ChargeRow>> {
        let sql = format!("SELECT {CHARGE_COLS} FROM charges WHERE id = $1");
        let charge = sqlx::query_as::<_, ChargeRow>(&sql)
            .bind(charge_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(charge)
    }

    async fn insert_credit(&mut self, credit: NewCredit) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO credits (
                id, account_id, amount_minor, currency, balance_before, balance_after,
                transaction_type, description, external_transaction_id, idempotency_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(credit.id)
        .bind(credit.account_id)
        .bind(credit.amount_minor)
        .bind(&credit.currency)
        .bind(credit.balance_before)
        .bind(credit.balance_after)
        .bind(&credit.transaction_type)
        .bind(&credit.description)
        .bind(&credit.external_transaction_id)
        .bind(&credit.idempotency_key)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_credit(&mut self, credit_id: Uuid) -> DbResult<Option<CreditRow>> {
        let sql = format!("SELECT {CREDIT_COLS} FROM credits WHERE id = $1");
        let credit = sqlx::query_as::<_, CreditRow>(&sql)
            .bind(credit_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(credit)
    }

    async fn lock_or_create_inventory(
        &mut self,
        account_id: Uuid,
        product_type: &str,
        seed_free: i32,
    ) -> DbResult<ProductInventoryRow> {
        let select = format!(
            "SELECT {INVENTORY_COLS} FROM product_inventory \
             WHERE account_id = $1 AND product_type = $2 FOR UPDATE"
        );
        if let Some(row) = sqlx::query_as::<_, ProductInventoryRow>(&select)
            .bind(account_id)
            .bind(product_type)
            .fetch_optional(&mut *self.tx)
            .await?
        {
            return Ok(row);
        }

        let insert = format!(
            r#"
            INSERT INTO product_inventory (
                id, account_id, product_type, free_remaining, paid_credits, last_daily_refresh
            )
            VALUES ($1, $2, $3, $4, 0, NOW())
            ON CONFLICT (account_id, product_type) DO NOTHING
            RETURNING {INVENTORY_COLS}
            "#
        );
        if let Some(row) = sqlx::query_as::<_, ProductInventoryRow>(&insert)
            .bind(Uuid::new_v4())
            .bind(account_id)
            .bind(product_type)
            .bind(seed_free)
            .fetch_optional(&mut *self.tx)
            .await?
        {
            return Ok(row);
        }

        // Lost the insert race; lock the winner's row.
        let row = sqlx::query_as::<_, ProductInventoryRow>(&select)
            .bind(account_id)
            .bind(product_type)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn get_inventory(
        &mut self,
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
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(inventory)
    }

    async fn update_inventory(&mut self, update: InventoryUpdate) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE product_inventory
            SET free_remaining = $3,
                paid_credits = $4,
                total_uses = $5,
                last_daily_refresh = $6,
                updated_at = NOW()
            WHERE account_id = $1 AND product_type = $2
            "#,
        )
        .bind(update.account_id)
        .bind(&update.product_type)
        .bind(update.free_remaining)
        .bind(update.paid_credits)
        .bind(update.total_uses)
        .bind(update.last_daily_refresh)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_product_usage(&mut self, usage: NewProductUsage) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO product_usage_logs (
                id, account_id, product_type, used_free, used_paid, cost_minor,
                free_before, free_after, paid_before, paid_after,
                idempotency_key, request_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(usage.id)
        .bind(usage.account_id)
        .bind(&usage.product_type)
        .bind(usage.used_free)
        .bind(usage.used_paid)
        .bind(usage.cost_minor)
        .bind(usage.free_before)
        .bind(usage.free_after)
        .bind(usage.paid_before)
        .bind(usage.paid_after)
        .bind(&usage.idempotency_key)
        .bind(&usage.request_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
