//! In-memory ledger store for engine tests
//!
//! Transactions clone the committed state, stage writes against the clone,
//! and swap it back on commit while holding an owned mutex guard. The guard
//! serialises mutations the way the account row lock does in PostgreSQL, and
//! dropping a transaction without commit discards the staged copy, matching
//! rollback-on-drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use tollgate_db::{
    AccountBalanceUpdate, AccountRow, ChargeRow, CreditCheckRow, CreditRow, DbError, DbResult,
    InventoryUpdate, LedgerStore, LedgerTx, NewAccount, NewCharge, NewCredit, NewCreditCheck,
    NewPayment, NewProductUsage, PaymentRow, ProductInventoryRow, ProductUsageRow, ProfilePatch,
};

/// Transactionally-covered tables
#[derive(Default, Clone)]
struct LedgerState {
    accounts: HashMap<Uuid, AccountRow>,
    charges: HashMap<Uuid, ChargeRow>,
    credits: HashMap<Uuid, CreditRow>,
    inventories: HashMap<(Uuid, String), ProductInventoryRow>,
    usages: HashMap<Uuid, ProductUsageRow>,
}

impl LedgerState {
    fn account_by_identity(&self, provider: &str, external_id: &str) -> Option<AccountRow> {
        self.accounts
            .values()
            .find(|a| a.oauth_provider == provider && a.external_id == external_id)
            .cloned()
    }

    fn charge_by_key(&self, account_id: Uuid, key: &str) -> Option<ChargeRow> {
        self.charges
            .values()
            .find(|c| c.account_id == account_id && c.idempotency_key.as_deref() == Some(key))
            .cloned()
    }

    fn credit_by_key(&self, account_id: Uuid, key: &str) -> Option<CreditRow> {
        self.credits
            .values()
            .find(|c| c.account_id == account_id && c.idempotency_key.as_deref() == Some(key))
            .cloned()
    }

    fn usage_by_key(&self, account_id: Uuid, key: &str) -> Option<ProductUsageRow> {
        self.usages
            .values()
            .find(|u| u.account_id == account_id && u.idempotency_key.as_deref() == Some(key))
            .cloned()
    }
}

/// In-memory ledger store
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    payments: DashMap<Uuid, PaymentRow>,
    credit_checks: DashMap<Uuid, CreditCheckRow>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force an account status for suspension/closure scenarios
    pub async fn set_status(&self, account_id: Uuid, status: &str) {
        let mut state = self.state.lock().await;
        if let Some(account) = state.accounts.get_mut(&account_id) {
            account.status = status.to_string();
        }
    }

    /// Current paid credits, for assertions
    pub async fn paid_credits(&self, account_id: Uuid) -> i64 {
        let state = self.state.lock().await;
        state.accounts[&account_id].paid_credits
    }

    /// Current free uses, for assertions
    pub async fn free_uses(&self, account_id: Uuid) -> i64 {
        let state = self.state.lock().await;
        state.accounts[&account_id].free_uses_remaining
    }

    /// Persisted daily pool state, for assertions
    pub async fn daily_free_uses(&self, account_id: Uuid) -> i64 {
        let state = self.state.lock().await;
        state.accounts[&account_id].daily_free_uses_remaining
    }

    /// Force daily pool state for reset scenarios
    pub async fn set_daily_free_uses(
        &self,
        account_id: Uuid,
        remaining: i64,
        reset_at: Option<chrono::DateTime<Utc>>,
    ) {
        let mut state = self.state.lock().await;
        if let Some(account) = state.accounts.get_mut(&account_id) {
            account.daily_free_uses_remaining = remaining;
            account.daily_free_uses_reset_at = reset_at;
        }
    }

    /// All charges for an account
    pub async fn charges_for(&self, account_id: Uuid) -> Vec<ChargeRow> {
        let state = self.state.lock().await;
        state
            .charges
            .values()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Credits carrying the given external transaction id
    pub async fn credits_with_external_id(&self, external_id: &str) -> Vec<CreditRow> {
        let state = self.state.lock().await;
        state
            .credits
            .values()
            .filter(|c| c.external_transaction_id.as_deref() == Some(external_id))
            .cloned()
            .collect()
    }

    /// Audit rows recorded so far
    pub fn credit_check_count(&self) -> usize {
        self.credit_checks.len()
    }

    /// Payment records for a provider
    pub fn payments_for_provider(&self, provider: &str) -> Vec<PaymentRow> {
        self.payments
            .iter()
            .filter(|entry| entry.value().provider == provider)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn account_from_new(new: NewAccount) -> AccountRow {
        let now = Utc::now();
        AccountRow {
            id: new.id,
            oauth_provider: new.oauth_provider,
            external_id: new.external_id,
            wa_id: new.wa_id,
            tenant_id: new.tenant_id,
            customer_email: new.customer_email,
            display_name: new.display_name,
            balance_minor: new.balance_minor,
            currency: new.currency,
            plan_name: new.plan_name,
            free_uses_remaining: new.free_uses_remaining,
            total_uses: 0,
            daily_free_uses_remaining: new.daily_free_uses_remaining,
            daily_free_uses_reset_at: None,
            daily_free_uses_limit: new.daily_free_uses_limit,
            paid_credits: 0,
            status: new.status,
            marketing_opt_in: new.marketing_opt_in,
            marketing_opt_in_at: new.marketing_opt_in.then_some(now),
            marketing_opt_in_source: new.marketing_opt_in_source,
            user_role: new.user_role,
            agent_id: new.agent_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn find_account_by_identity(
        &self,
        oauth_provider: &str,
        external_id: &str,
    ) -> DbResult<Option<AccountRow>> {
        let state = self.state.lock().await;
        Ok(state.account_by_identity(oauth_provider, external_id))
    }

    async fn find_account_by_id(&self, id: Uuid) -> DbResult<Option<AccountRow>> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&id).cloned())
    }

    async fn upsert_account(&self, account: NewAccount) -> DbResult<AccountRow> {
        let mut state = self.state.lock().await;
        if let Some(existing) =
            state.account_by_identity(&account.oauth_provider, &account.external_id)
        {
            return Ok(existing);
        }
        let row = Self::account_from_new(account);
        state.accounts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_profile(&self, account_id: Uuid, patch: ProfilePatch) -> DbResult<()> {
        let mut state = self.state.lock().await;
        if let Some(account) = state.accounts.get_mut(&account_id) {
            if account.customer_email.is_none() {
                account.customer_email = patch.customer_email;
            }
            if account.display_name.is_none() {
                account.display_name = patch.display_name;
            }
            if patch.marketing_opt_in && !account.marketing_opt_in {
                account.marketing_opt_in = true;
                account.marketing_opt_in_at = Some(Utc::now());
            }
            if account.marketing_opt_in_source.is_none() {
                account.marketing_opt_in_source = patch.marketing_opt_in_source;
            }
            if account.user_role.is_none() {
                account.user_role = patch.user_role;
            }
            if account.agent_id.is_none() {
                account.agent_id = patch.agent_id;
            }
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_charge_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<ChargeRow>> {
        let state = self.state.lock().await;
        Ok(state.charge_by_key(account_id, key))
    }

    async fn find_credit_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<CreditRow>> {
        let state = self.state.lock().await;
        Ok(state.credit_by_key(account_id, key))
    }

    async fn find_product_usage_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<ProductUsageRow>> {
        let state = self.state.lock().await;
        Ok(state.usage_by_key(account_id, key))
    }

    async fn find_product_inventory(
        &self,
        account_id: Uuid,
        product_type: &str,
    ) -> DbResult<Option<ProductInventoryRow>> {
        let state = self.state.lock().await;
        Ok(state
            .inventories
            .get(&(account_id, product_type.to_string()))
            .cloned())
    }

    async fn find_payment_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> DbResult<Option<PaymentRow>> {
        Ok(self
            .payments
            .iter()
            .find(|entry| {
                entry.value().provider == provider && entry.value().external_id == external_id
            })
            .map(|entry| entry.value().clone()))
    }

    async fn insert_payment(&self, payment: NewPayment) -> DbResult<PaymentRow> {
        if self
            .find_payment_by_external_id(&payment.provider, &payment.external_id)
            .await?
            .is_some()
        {
            return Err(DbError::DuplicateKey("uq_payments_provider_external".into()));
        }
        let now = Utc::now();
        let row = PaymentRow {
            id: payment.id,
            provider: payment.provider,
            external_id: payment.external_id,
            account_id: payment.account_id,
            amount_minor: payment.amount_minor,
            currency: payment.currency,
            status: payment.status,
            credit_id: None,
            created_at: now,
            updated_at: now,
        };
        self.payments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_payment(
        &self,
        payment_id: Uuid,
        status: &str,
        credit_id: Option<Uuid>,
    ) -> DbResult<()> {
        if let Some(mut entry) = self.payments.get_mut(&payment_id) {
            entry.status = status.to_string();
            if credit_id.is_some() {
                entry.credit_id = credit_id;
            }
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_credit_check(&self, check: NewCreditCheck) -> DbResult<()> {
        let id = Uuid::new_v4();
        self.credit_checks.insert(
            id,
            CreditCheckRow {
                id,
                account_id: check.account_id,
                oauth_provider: check.oauth_provider,
                external_id: check.external_id,
                wa_id: check.wa_id,
                tenant_id: check.tenant_id,
                has_credit: check.has_credit,
                credits_remaining: check.credits_remaining,
                plan_name: check.plan_name,
                pool: check.pool,
                denial_reason: check.denial_reason,
                context_agent_id: check.context_agent_id,
                context_channel_id: check.context_channel_id,
                context_request_id: check.context_request_id,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn begin(&self) -> DbResult<Box<dyn LedgerTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

/// Staged-copy transaction over the in-memory state
struct MemoryTx {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_account(&mut self, account_id: Uuid) -> DbResult<Option<AccountRow>> {
        Ok(self.working.accounts.get(&account_id).cloned())
    }

    async fn get_account(&mut self, account_id: Uuid) -> DbResult<Option<AccountRow>> {
        Ok(self.working.accounts.get(&account_id).cloned())
    }

    async fn update_account_balances(&mut self, update: AccountBalanceUpdate) -> DbResult<()> {
        if update.paid_credits < 0
            || update.free_uses_remaining < 0
            || update.daily_free_uses_remaining < 0
            || update.balance_minor < 0
        {
            return Err(DbError::CheckViolation("negative balance".into()));
        }
        if let Some(account) = self.working.accounts.get_mut(&update.account_id) {
            account.paid_credits = update.paid_credits;
            account.free_uses_remaining = update.free_uses_remaining;
            account.daily_free_uses_remaining = update.daily_free_uses_remaining;
            account.daily_free_uses_reset_at = update.daily_free_uses_reset_at;
            account.balance_minor = update.balance_minor;
            account.total_uses = update.total_uses;
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_charge(&mut self, charge: NewCharge) -> DbResult<()> {
        if charge.amount_minor <= 0 {
            return Err(DbError::CheckViolation("ck_charges_amount_positive".into()));
        }
        if let Some(key) = charge.idempotency_key.as_deref() {
            if self.working.charge_by_key(charge.account_id, key).is_some() {
                return Err(DbError::DuplicateKey("uq_charges_idempotency".into()));
            }
        }
        self.working.charges.insert(
            charge.id,
            ChargeRow {
                id: charge.id,
                account_id: charge.account_id,
                amount_minor: charge.amount_minor,
                currency: charge.currency,
                balance_before: charge.balance_before,
                balance_after: charge.balance_after,
                description: charge.description,
                idempotency_key: charge.idempotency_key,
                metadata_message_id: charge.metadata_message_id,
                metadata_agent_id: charge.metadata_agent_id,
                metadata_channel_id: charge.metadata_channel_id,
                metadata_request_id: charge.metadata_request_id,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_charge(&mut self, charge_id: Uuid) -> DbResult<Option<ChargeRow>> {
        Ok(self.working.charges.get(&charge_id).cloned())
    }

    async fn insert_credit(&mut self, credit: NewCredit) -> DbResult<()> {
        if credit.amount_minor <= 0 {
            return Err(DbError::CheckViolation("ck_credits_amount_positive".into()));
        }
        if credit.balance_after != credit.balance_before + credit.amount_minor {
            return Err(DbError::CheckViolation(
                "ck_credits_balance_consistency".into(),
            ));
        }
        if let Some(key) = credit.idempotency_key.as_deref() {
            if self.working.credit_by_key(credit.account_id, key).is_some() {
                return Err(DbError::DuplicateKey("uq_credits_idempotency".into()));
            }
        }
        self.working.credits.insert(
            credit.id,
            CreditRow {
                id: credit.id,
                account_id: credit.account_id,
                amount_minor: credit.amount_minor,
                currency: credit.currency,
                balance_before: credit.balance_before,
                balance_after: credit.balance_after,
                transaction_type: credit.transaction_type,
                description: credit.description,
                external_transaction_id: credit.external_transaction_id,
                idempotency_key: credit.idempotency_key,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_credit(&mut self, credit_id: Uuid) -> DbResult<Option<CreditRow>> {
        Ok(self.working.credits.get(&credit_id).cloned())
    }

    async fn lock_or_create_inventory(
        &mut self,
        account_id: Uuid,
        product_type: &str,
        seed_free: i32,
    ) -> DbResult<ProductInventoryRow> {
        let key = (account_id, product_type.to_string());
        if let Some(existing) = self.working.inventories.get(&key) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let row = ProductInventoryRow {
            id: Uuid::new_v4(),
            account_id,
            product_type: product_type.to_string(),
            free_remaining: seed_free,
            paid_credits: 0,
            last_daily_refresh: Some(now),
            total_uses: 0,
            created_at: now,
            updated_at: now,
        };
        self.working.inventories.insert(key, row.clone());
        Ok(row)
    }

    async fn get_inventory(
        &mut self,
        account_id: Uuid,
        product_type: &str,
    ) -> DbResult<Option<ProductInventoryRow>> {
        Ok(self
            .working
            .inventories
            .get(&(account_id, product_type.to_string()))
            .cloned())
    }

    async fn update_inventory(&mut self, update: InventoryUpdate) -> DbResult<()> {
        if update.free_remaining < 0 || update.paid_credits < 0 {
            return Err(DbError::CheckViolation("negative inventory".into()));
        }
        let key = (update.account_id, update.product_type.clone());
        if let Some(inventory) = self.working.inventories.get_mut(&key) {
            inventory.free_remaining = update.free_remaining;
            inventory.paid_credits = update.paid_credits;
            inventory.total_uses = update.total_uses;
            inventory.last_daily_refresh = update.last_daily_refresh;
            inventory.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_product_usage(&mut self, usage: NewProductUsage) -> DbResult<()> {
        if let Some(key) = usage.idempotency_key.as_deref() {
            if self.working.usage_by_key(usage.account_id, key).is_some() {
                return Err(DbError::DuplicateKey("uq_product_usage_idempotency".into()));
            }
        }
        self.working.usages.insert(
            usage.id,
            ProductUsageRow {
                id: usage.id,
                account_id: usage.account_id,
                product_type: usage.product_type,
                used_free: usage.used_free,
                used_paid: usage.used_paid,
                cost_minor: usage.cost_minor,
                free_before: usage.free_before,
                free_after: usage.free_after,
                paid_before: usage.paid_before,
                paid_after: usage.paid_after,
                idempotency_key: usage.idempotency_key,
                request_id: usage.request_id,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> DbResult<()> {
        *self.guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        // Staged copy is simply discarded.
        Ok(())
    }
}

/// Store wrapper that corrupts the account read-back inside transactions,
/// for exercising write-verification failure paths.
pub struct FaultyStore {
    inner: Arc<MemoryLedgerStore>,
    pub corrupt_account_readback: Arc<AtomicBool>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryLedgerStore>) -> Self {
        Self {
            inner,
            corrupt_account_readback: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl LedgerStore for FaultyStore {
    async fn find_account_by_identity(
        &self,
        oauth_provider: &str,
        external_id: &str,
    ) -> DbResult<Option<AccountRow>> {
        self.inner
            .find_account_by_identity(oauth_provider, external_id)
            .await
    }

    async fn find_account_by_id(&self, id: Uuid) -> DbResult<Option<AccountRow>> {
        self.inner.find_account_by_id(id).await
    }

    async fn upsert_account(&self, account: NewAccount) -> DbResult<AccountRow> {
        self.inner.upsert_account(account).await
    }

    async fn update_profile(&self, account_id: Uuid, patch: ProfilePatch) -> DbResult<()> {
        self.inner.update_profile(account_id, patch).await
    }

    async fn find_charge_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<ChargeRow>> {
        self.inner.find_charge_by_idempotency(account_id, key).await
    }

    async fn find_credit_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<CreditRow>> {
        self.inner.find_credit_by_idempotency(account_id, key).await
    }

    async fn find_product_usage_by_idempotency(
        &self,
        account_id: Uuid,
        key: &str,
    ) -> DbResult<Option<ProductUsageRow>> {
        self.inner
            .find_product_usage_by_idempotency(account_id, key)
            .await
    }

    async fn find_product_inventory(
        &self,
        account_id: Uuid,
        product_type: &str,
    ) -> DbResult<Option<ProductInventoryRow>> {
        self.inner
            .find_product_inventory(account_id, product_type)
            .await
    }

    async fn find_payment_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> DbResult<Option<PaymentRow>> {
        self.inner
            .find_payment_by_external_id(provider, external_id)
            .await
    }

    async fn insert_payment(&self, payment: NewPayment) -> DbResult<PaymentRow> {
        self.inner.insert_payment(payment).await
    }

    async fn update_payment(
        &self,
        payment_id: Uuid,
        status: &str,
        credit_id: Option<Uuid>,
    ) -> DbResult<()> {
        self.inner.update_payment(payment_id, status, credit_id).await
    }

    async fn insert_credit_check(&self, check: NewCreditCheck) -> DbResult<()> {
        self.inner.insert_credit_check(check).await
    }

    async fn begin(&self) -> DbResult<Box<dyn LedgerTx>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(FaultyTx {
            inner,
            corrupt_account_readback: Arc::clone(&self.corrupt_account_readback),
        }))
    }
}

struct FaultyTx {
    inner: Box<dyn LedgerTx>,
    corrupt_account_readback: Arc<AtomicBool>,
}

#[async_trait]
impl LedgerTx for FaultyTx {
    async fn lock_account(&mut self, account_id: Uuid) -> DbResult<Option<AccountRow>> {
        self.inner.lock_account(account_id).await
    }

    async fn get_account(&mut self, account_id: Uuid) -> DbResult<Option<AccountRow>> {
        let mut account = self.inner.get_account(account_id).await?;
        if self.corrupt_account_readback.load(Ordering::SeqCst) {
            if let Some(account) = account.as_mut() {
                account.paid_credits += 1;
            }
        }
        Ok(account)
    }

    async fn update_account_balances(&mut self, update: AccountBalanceUpdate) -> DbResult<()> {
        self.inner.update_account_balances(update).await
    }

    async fn insert_charge(&mut self, charge: NewCharge) -> DbResult<()> {
        self.inner.insert_charge(charge).await
    }

    async fn get_charge(&mut self, charge_id: Uuid) -> DbResult<Option<ChargeRow>> {
        self.inner.get_charge(charge_id).await
    }

    async fn insert_credit(&mut self, credit: NewCredit) -> DbResult<()> {
        self.inner.insert_credit(credit).await
    }

    async fn get_credit(&mut self, credit_id: Uuid) -> DbResult<Option<CreditRow>> {
        self.inner.get_credit(credit_id).await
    }

    async fn lock_or_create_inventory(
        &mut self,
        account_id: Uuid,
        product_type: &str,
        seed_free: i32,
    ) -> DbResult<ProductInventoryRow> {
        self.inner
            .lock_or_create_inventory(account_id, product_type, seed_free)
            .await
    }

    async fn get_inventory(
        &mut self,
        account_id: Uuid,
        product_type: &str,
    ) -> DbResult<Option<ProductInventoryRow>> {
        self.inner.get_inventory(account_id, product_type).await
    }

    async fn update_inventory(&mut self, update: InventoryUpdate) -> DbResult<()> {
        self.inner.update_inventory(update).await
    }

    async fn insert_product_usage(&mut self, usage: NewProductUsage) -> DbResult<()> {
        self.inner.insert_product_usage(usage).await
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.inner.rollback().await
    }
}
