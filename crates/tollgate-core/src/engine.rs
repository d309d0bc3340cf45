//! Ledger engine
//!
//! Applies charges and credits under row-level locks, performs write
//! verification, and maintains the ledger invariants. All multi-statement
//! balance mutations run under READ COMMITTED with an explicit
//! `SELECT ... FOR UPDATE` on the account row; the transaction object rolls
//! back on drop, so cancellation before commit leaves no side effect.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use tollgate_db::{
    AccountBalanceUpdate, AccountRow, ChargeRow, CreditRow, DbError, InventoryUpdate, LedgerStore,
    LedgerTx, NewAccount, NewCharge, NewCredit, NewCreditCheck, NewProductUsage, ProductUsageRow,
    ProfilePatch,
};
use tollgate_types::{
    validate_idempotency_key, AccountId, AccountIdentity, AccountProfile, AccountStatus, ChargeId,
    ChargeMetadata, CreditCheckContext, CreditId, PoolKind, PurchaseHint, TransactionType,
};

use crate::audit;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::policy::{self, MainPools, PoolSelection, ProductPoolSelection, ProductPools};

/// Intent to deduct from an account
#[derive(Debug, Clone)]
pub struct ChargeIntent {
    pub identity: AccountIdentity,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub metadata: ChargeMetadata,
    pub idempotency_key: Option<String>,
}

/// Intent to add to an account
#[derive(Debug, Clone)]
pub struct CreditIntent {
    pub identity: AccountIdentity,
    pub amount_minor: i64,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub description: String,
    pub external_transaction_id: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Intent to charge one product use
#[derive(Debug, Clone)]
pub struct ProductChargeIntent {
    pub identity: AccountIdentity,
    pub product_type: String,
    pub amount_minor: i64,
    pub idempotency_key: Option<String>,
    pub request_id: Option<String>,
}

/// Seed values for account upserts
#[derive(Debug, Clone, Default)]
pub struct AccountSeed {
    pub initial_balance_minor: i64,
    pub currency: Option<String>,
    pub plan_name: Option<String>,
    pub profile: AccountProfile,
}

/// Public projection of an account
#[derive(Debug, Clone)]
pub struct AccountSummary {
    pub account_id: AccountId,
    pub identity: AccountIdentity,
    pub customer_email: Option<String>,
    pub display_name: Option<String>,
    pub balance_minor: i64,
    pub currency: String,
    pub plan_name: String,
    pub status: AccountStatus,
    pub paid_credits: i64,
    pub free_uses_remaining: i64,
    pub daily_free_uses_remaining: i64,
    pub daily_free_uses_limit: i64,
    pub daily_free_uses_reset_at: Option<DateTime<Utc>>,
    pub total_uses: i64,
    pub marketing_opt_in: bool,
    pub marketing_opt_in_at: Option<DateTime<Utc>>,
    pub marketing_opt_in_source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public projection of a charge
#[derive(Debug, Clone)]
pub struct ChargeReceipt {
    pub charge_id: ChargeId,
    pub account_id: AccountId,
    pub amount_minor: i64,
    pub currency: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: String,
    pub metadata: ChargeMetadata,
    pub created_at: DateTime<Utc>,
}

/// Public projection of a credit
#[derive(Debug, Clone)]
pub struct CreditReceipt {
    pub credit_id: CreditId,
    pub account_id: AccountId,
    pub amount_minor: i64,
    pub currency: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub transaction_type: TransactionType,
    pub description: String,
    pub external_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of a product charge
#[derive(Debug, Clone)]
pub struct ProductChargeReceipt {
    pub usage_id: Uuid,
    pub account_id: AccountId,
    pub product_type: String,
    pub used_free: bool,
    pub used_paid: bool,
    pub used_main_pool: bool,
    pub cost_minor: i32,
    pub free_remaining: i32,
    pub paid_credits: i32,
    pub main_paid_credits: i64,
    pub total_uses: i64,
}

/// Charge result, distinguishing fresh writes from idempotent replays
///
/// A replay is success from the ledger's perspective; the HTTP surface maps
/// it to 409 with the prior charge id.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Created(ChargeReceipt),
    Duplicate(ChargeReceipt),
}

impl ChargeOutcome {
    pub fn receipt(&self) -> &ChargeReceipt {
        match self {
            Self::Created(r) | Self::Duplicate(r) => r,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Credit result, distinguishing fresh writes from idempotent replays
#[derive(Debug, Clone)]
pub enum CreditOutcome {
    Created(CreditReceipt),
    Duplicate(CreditReceipt),
}

impl CreditOutcome {
    pub fn receipt(&self) -> &CreditReceipt {
        match self {
            Self::Created(r) | Self::Duplicate(r) => r,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Product charge result
#[derive(Debug, Clone)]
pub enum ProductChargeOutcome {
    Created(ProductChargeReceipt),
    Duplicate(ProductChargeReceipt),
}

impl ProductChargeOutcome {
    pub fn receipt(&self) -> &ProductChargeReceipt {
        match self {
            Self::Created(r) | Self::Duplicate(r) => r,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Authorisation decision returned to callers
#[derive(Debug, Clone)]
pub struct CreditCheckSummary {
    pub has_credit: bool,
    pub credits_remaining: i64,
    pub free_uses_remaining: i64,
    pub daily_free_uses_remaining: i64,
    pub daily_free_uses_limit: i64,
    pub total_uses: i64,
    pub plan_name: String,
    pub pool: PoolKind,
    pub reason: Option<String>,
    pub purchase_required: bool,
    pub purchase_hint: Option<PurchaseHint>,
}

/// The transactional ledger engine
pub struct LedgerEngine<S> {
    store: Arc<S>,
    config: LedgerConfig,
}

impl<S: LedgerStore> LedgerEngine<S> {
    /// Create an engine over a ledger store
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Engine configuration
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Underlying store handle
    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    // ========================================================================
    // Authorisation
    // ========================================================================

    /// Decide whether the principal may be served
    ///
    /// Auto-creates the account with seeded free uses on first sight. The
    /// decision is appended to the audit log asynchronously; audit failures
    /// never surface here.
    pub async fn check_credit(
        &self,
        identity: &AccountIdentity,
        context: Option<&CreditCheckContext>,
        profile: &AccountProfile,
    ) -> LedgerResult<CreditCheckSummary> {
        identity
            .validate()
            .map_err(|e| LedgerError::Validation(e.to_string()))?;

        let existing = self
            .store
            .find_account_by_identity(&identity.oauth_provider, &identity.external_id)
            .await?;

        let account = match existing {
            Some(row) => {
                if !profile.is_empty() {
                    self.store
                        .update_profile(row.id, profile_patch(profile))
                        .await?;
                }
                row
            }
            None => {
                self.store
                    .upsert_account(self.new_account(identity, &AccountSeed {
                        profile: profile.clone(),
                        ..AccountSeed::default()
                    }))
                    .await?
            }
        };

        let status = parse_status(&account)?;
        // Report the daily pool at its post-reset value; the reset itself is
        // written by the next charge, under the row lock.
        let daily_free = if policy::daily_reset_due(account.daily_free_uses_reset_at, Utc::now()) {
            account.daily_free_uses_limit
        } else {
            account.daily_free_uses_remaining
        };
        let decision = policy::authorize(
            status,
            MainPools {
                daily_free_uses_remaining: daily_free,
                free_uses_remaining: account.free_uses_remaining,
                paid_credits: account.paid_credits,
            },
        );

        let purchase_required = decision.reason
            == Some(policy::DenialReason::NoCreditsRemaining);
        let summary = CreditCheckSummary {
            has_credit: decision.allowed,
            credits_remaining: account.paid_credits,
            free_uses_remaining: account.free_uses_remaining,
            daily_free_uses_remaining: daily_free,
            daily_free_uses_limit: account.daily_free_uses_limit,
            total_uses: account.total_uses,
            plan_name: account.plan_name.clone(),
            pool: decision.pool,
            reason: decision.reason.map(|r| r.message().to_string()),
            purchase_required,
            purchase_hint: purchase_required.then(|| self.config.purchase_hint()),
        };

        audit::spawn_credit_check_append(
            Arc::clone(&self.store),
            NewCreditCheck {
                account_id: Some(account.id),
                oauth_provider: identity.oauth_provider.clone(),
                external_id: identity.external_id.clone(),
                wa_id: identity.wa_id.clone(),
                tenant_id: identity.tenant_id.clone(),
                has_credit: summary.has_credit,
                credits_remaining: Some(account.paid_credits),
                plan_name: Some(account.plan_name.clone()),
                pool: decision.pool.as_str().to_string(),
                denial_reason: summary.reason.clone(),
                context_agent_id: context.and_then(|c| c.agent_id.clone()),
                context_channel_id: context.and_then(|c| c.channel_id.clone()),
                context_request_id: context.and_then(|c| c.request_id.clone()),
            },
        );

        tracing::debug!(
            account_id = %account.id,
            has_credit = summary.has_credit,
            pool = decision.pool.as_str(),
            "credit check"
        );

        Ok(summary)
    }

    // ========================================================================
    // Charges
    // ========================================================================

    /// Deduct from an account
    ///
    /// Preconditions run in order: amount, existence, status, replay. The
    /// transactional body locks the account row, applies the pool policy,
    /// appends the charge, and verifies the write before committing.
    pub async fn create_charge(&self, intent: ChargeIntent) -> LedgerResult<ChargeOutcome> {
        validate_amount(intent.amount_minor)?;
        intent
            .identity
            .validate()
            .map_err(|e| LedgerError::Validation(e.to_string()))?;
        validate_key(intent.idempotency_key.as_deref())?;

        let account = self
            .store
            .find_account_by_identity(&intent.identity.oauth_provider, &intent.identity.external_id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;

        match parse_status(&account)? {
            AccountStatus::Suspended => {
                return Err(LedgerError::AccountSuspended("Account suspended".into()));
            }
            AccountStatus::Closed => return Err(LedgerError::AccountClosed),
            AccountStatus::Active => {}
        }

        if let Some(key) = intent.idempotency_key.as_deref() {
            if let Some(prior) = self.store.find_charge_by_idempotency(account.id, key).await? {
                return Ok(ChargeOutcome::Duplicate(charge_receipt(prior)));
            }
        }

        if account.currency != intent.currency {
            return Err(LedgerError::Validation(format!(
                "currency mismatch: account={}, charge={}",
                account.currency, intent.currency
            )));
        }

        let mut tx = self.store.begin().await?;
        let locked = tx
            .lock_account(account.id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;

        // Apply an overdue daily reset under the lock, before pool selection.
        let now = Utc::now();
        let reset_due = policy::daily_reset_due(locked.daily_free_uses_reset_at, now);
        let daily_available = if reset_due {
            locked.daily_free_uses_limit
        } else {
            locked.daily_free_uses_remaining
        };
        let daily_reset_at = if reset_due {
            Some(policy::next_daily_reset(now))
        } else {
            locked.daily_free_uses_reset_at
        };

        let pools = MainPools {
            daily_free_uses_remaining: daily_available,
            free_uses_remaining: locked.free_uses_remaining,
            paid_credits: locked.paid_credits,
        };
        let (new_daily, new_free, new_paid, pool) =
            match policy::select_main_pool(pools, intent.amount_minor) {
                PoolSelection::DailyFree => (
                    daily_available - 1,
                    locked.free_uses_remaining,
                    locked.paid_credits,
                    PoolKind::Free,
                ),
                PoolSelection::FreeUse => (
                    daily_available,
                    locked.free_uses_remaining - 1,
                    locked.paid_credits,
                    PoolKind::Free,
                ),
                PoolSelection::PaidCredits => (
                    daily_available,
                    locked.free_uses_remaining,
                    locked.paid_credits - intent.amount_minor,
                    PoolKind::Paid,
                ),
                PoolSelection::Denied => {
                    return Err(LedgerError::InsufficientCredits {
                        balance: locked.paid_credits,
                        required: intent.amount_minor,
                        hint: Some(self.config.purchase_hint()),
                    });
                }
            };

        tx.update_account_balances(AccountBalanceUpdate {
            account_id: locked.id,
            paid_credits: new_paid,
            free_uses_remaining: new_free,
            daily_free_uses_remaining: new_daily,
            daily_free_uses_reset_at: daily_reset_at,
            balance_minor: locked.balance_minor,
            total_uses: locked.total_uses + 1,
        })
        .await?;

        let charge_id = Uuid::new_v4();
        let insert = tx
            .insert_charge(NewCharge {
                id: charge_id,
                account_id: locked.id,
                amount_minor: intent.amount_minor,
                currency: intent.currency.clone(),
                balance_before: locked.paid_credits,
                balance_after: new_paid,
                description: intent.description.clone(),
                idempotency_key: intent.idempotency_key.clone(),
                metadata_message_id: intent.metadata.message_id.clone(),
                metadata_agent_id: intent.metadata.agent_id.clone(),
                metadata_channel_id: intent.metadata.channel_id.clone(),
                metadata_request_id: intent.metadata.request_id.clone(),
            })
            .await;

        if let Err(err) = insert {
            if let (DbError::DuplicateKey(_), Some(key)) = (&err, intent.idempotency_key.as_deref())
            {
                // Lost a same-key race; the winner's row is committed.
                drop(tx);
                let prior = self
                    .store
                    .find_charge_by_idempotency(account.id, key)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::DataIntegrity(
                            "duplicate charge key reported but prior charge not found".into(),
                        )
                    })?;
                return Ok(ChargeOutcome::Duplicate(charge_receipt(prior)));
            }
            return Err(err.into());
        }

        let verified_account = tx
            .get_account(locked.id)
            .await?
            .ok_or_else(|| LedgerError::WriteVerification("account disappeared".into()))?;
        self.verify_account_balances(
            &verified_account,
            new_paid,
            new_free,
            new_daily,
            locked.balance_minor,
        )?;

        let verified_charge = tx.get_charge(charge_id).await?.ok_or_else(|| {
            LedgerError::WriteVerification(format!("charge {charge_id} not found after insert"))
        })?;
        if verified_charge.amount_minor != intent.amount_minor
            || verified_charge.balance_after != new_paid
            || verified_charge.account_id != locked.id
        {
            return Err(LedgerError::WriteVerification(format!(
                "charge {charge_id} read back with unexpected fields"
            )));
        }

        tx.commit().await?;

        tracing::info!(
            account_id = %locked.id,
            charge_id = %charge_id,
            amount_minor = intent.amount_minor,
            pool = pool.as_str(),
            "charge created"
        );

        Ok(ChargeOutcome::Created(charge_receipt(verified_charge)))
    }

    // ========================================================================
    // Credits
    // ========================================================================

    /// Add to an account's paid pool
    ///
    /// The account is created implicitly if absent: purchase webhooks can
    /// arrive before the user is otherwise known. Suspended and closed
    /// accounts still accept credits.
    pub async fn add_credits(&self, intent: CreditIntent) -> LedgerResult<CreditOutcome> {
        validate_amount(intent.amount_minor)?;
        intent
            .identity
            .validate()
            .map_err(|e| LedgerError::Validation(e.to_string()))?;
        validate_key(intent.idempotency_key.as_deref())?;

        let account = match self
            .store
            .find_account_by_identity(&intent.identity.oauth_provider, &intent.identity.external_id)
            .await?
        {
            Some(row) => row,
            None => {
                self.store
                    .upsert_account(self.new_account(&intent.identity, &AccountSeed::default()))
                    .await?
            }
        };

        if let Some(key) = intent.idempotency_key.as_deref() {
            if let Some(prior) = self.store.find_credit_by_idempotency(account.id, key).await? {
                return Ok(CreditOutcome::Duplicate(credit_receipt(prior)?));
            }
        }

        if account.currency != intent.currency {
            return Err(LedgerError::Validation(format!(
                "currency mismatch: account={}, credit={}",
                account.currency, intent.currency
            )));
        }

        let mut tx = self.store.begin().await?;
        let locked = tx
            .lock_account(account.id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;

        let balance_before = locked.paid_credits;
        let balance_after = balance_before
            .checked_add(intent.amount_minor)
            .ok_or_else(|| LedgerError::DataIntegrity("paid credits overflow".into()))?;

        let credit_id = Uuid::new_v4();
        let insert = tx
            .insert_credit(NewCredit {
                id: credit_id,
                account_id: locked.id,
                amount_minor: intent.amount_minor,
                currency: intent.currency.clone(),
                balance_before,
                balance_after,
                transaction_type: intent.transaction_type.as_str().to_string(),
                description: intent.description.clone(),
                external_transaction_id: intent.external_transaction_id.clone(),
                idempotency_key: intent.idempotency_key.clone(),
            })
            .await;

        if let Err(err) = insert {
            if let (DbError::DuplicateKey(_), Some(key)) = (&err, intent.idempotency_key.as_deref())
            {
                drop(tx);
                let prior = self
                    .store
                    .find_credit_by_idempotency(account.id, key)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::DataIntegrity(
                            "duplicate credit key reported but prior credit not found".into(),
                        )
                    })?;
                return Ok(CreditOutcome::Duplicate(credit_receipt(prior)?));
            }
            return Err(err.into());
        }

        tx.update_account_balances(AccountBalanceUpdate {
            account_id: locked.id,
            paid_credits: balance_after,
            free_uses_remaining: locked.free_uses_remaining,
            daily_free_uses_remaining: locked.daily_free_uses_remaining,
            daily_free_uses_reset_at: locked.daily_free_uses_reset_at,
            balance_minor: locked.balance_minor,
            total_uses: locked.total_uses,
        })
        .await?;

        let verified_account = tx
            .get_account(locked.id)
            .await?
            .ok_or_else(|| LedgerError::WriteVerification("account disappeared".into()))?;
        if verified_account.paid_credits != balance_before + intent.amount_minor {
            return Err(LedgerError::WriteVerification(format!(
                "paid credits mismatch: expected {}, got {}",
                balance_before + intent.amount_minor,
                verified_account.paid_credits
            )));
        }
        if self.config.enforce_minor_balance
            && verified_account.balance_minor != locked.balance_minor
        {
            return Err(LedgerError::WriteVerification(
                "balance_minor moved during credit".into(),
            ));
        }

        let verified_credit = tx.get_credit(credit_id).await?.ok_or_else(|| {
            LedgerError::WriteVerification(format!("credit {credit_id} not found after insert"))
        })?;

        tx.commit().await?;

        tracing::info!(
            account_id = %locked.id,
            credit_id = %credit_id,
            amount_minor = intent.amount_minor,
            transaction_type = intent.transaction_type.as_str(),
            "credit created"
        );

        Ok(CreditOutcome::Created(credit_receipt(verified_credit)?))
    }

    // ========================================================================
    // Product charges
    // ========================================================================

    /// Charge one product use
    ///
    /// Draws from the product's free pool, then its paid pool, then falls
    /// back to the account's main paid pool. The fallback also appends a
    /// Charge row so main-pool ledger sums stay consistent.
    pub async fn charge_product(
        &self,
        intent: ProductChargeIntent,
    ) -> LedgerResult<ProductChargeOutcome> {
        validate_amount(intent.amount_minor)?;
        intent
            .identity
            .validate()
            .map_err(|e| LedgerError::Validation(e.to_string()))?;
        validate_key(intent.idempotency_key.as_deref())?;
        if intent.product_type.is_empty() || intent.product_type.len() > 50 {
            return Err(LedgerError::Validation("invalid product type".into()));
        }
        let cost_amount = i32::try_from(intent.amount_minor)
            .map_err(|_| LedgerError::Validation("amount too large for product charge".into()))?;

        let account = self
            .store
            .find_account_by_identity(&intent.identity.oauth_provider, &intent.identity.external_id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;

        match parse_status(&account)? {
            AccountStatus::Suspended => {
                return Err(LedgerError::AccountSuspended("Account suspended".into()));
            }
            AccountStatus::Closed => return Err(LedgerError::AccountClosed),
            AccountStatus::Active => {}
        }

        if let Some(key) = intent.idempotency_key.as_deref() {
            if let Some(prior) = self
                .store
                .find_product_usage_by_idempotency(account.id, key)
                .await?
            {
                let inventory = self
                    .store
                    .find_product_inventory(account.id, &prior.product_type)
                    .await?;
                return Ok(ProductChargeOutcome::Duplicate(product_receipt_from_log(
                    prior,
                    account.paid_credits,
                    inventory.map(|inv| inv.total_uses).unwrap_or_default(),
                )));
            }
        }

        let product_cfg = self.config.product(&intent.product_type);

        let mut tx = self.store.begin().await?;
        let locked = tx
            .lock_account(account.id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;
        let inventory = tx
            .lock_or_create_inventory(locked.id, &intent.product_type, product_cfg.free_initial)
            .await?;

        let now = Utc::now();
        let refresh_due = policy::needs_daily_refresh(inventory.last_daily_refresh, now);
        let free_available = if refresh_due {
            policy::refreshed_free(
                inventory.free_remaining,
                product_cfg.free_daily,
                product_cfg.free_initial,
            )
        } else {
            inventory.free_remaining
        };

        let selection = policy::select_product_pool(
            ProductPools {
                free_remaining: free_available,
                paid_credits: inventory.paid_credits,
                main_paid_credits: locked.paid_credits,
            },
            intent.amount_minor,
        );

        let free_before = free_available;
        let paid_before = inventory.paid_credits;
        let main_before = locked.paid_credits;
        let (free_after, paid_after, main_after, cost_minor, used_free, used_paid) = match selection
        {
            ProductPoolSelection::ProductFree => {
                (free_before - 1, paid_before, main_before, 0, true, false)
            }
            ProductPoolSelection::ProductPaid => (
                free_before,
                paid_before - 1,
                main_before,
                product_cfg.price_minor,
                false,
                true,
            ),
            ProductPoolSelection::MainPool => (
                free_before,
                paid_before,
                main_before - intent.amount_minor,
                cost_amount,
                false,
                false,
            ),
            ProductPoolSelection::Denied => {
                return Err(LedgerError::InsufficientCredits {
                    balance: i64::from(free_before) + i64::from(paid_before) + main_before,
                    required: intent.amount_minor,
                    hint: Some(self.config.purchase_hint()),
                });
            }
        };
        let used_main_pool = matches!(selection, ProductPoolSelection::MainPool);

        let usage_id = Uuid::new_v4();
        let insert = tx
            .insert_product_usage(NewProductUsage {
                id: usage_id,
                account_id: locked.id,
                product_type: intent.product_type.clone(),
                used_free,
                used_paid,
                cost_minor,
                free_before,
                free_after,
                paid_before,
                paid_after,
                idempotency_key: intent.idempotency_key.clone(),
                request_id: intent.request_id.clone(),
            })
            .await;

        if let Err(err) = insert {
            if let (DbError::DuplicateKey(_), Some(key)) = (&err, intent.idempotency_key.as_deref())
            {
                drop(tx);
                let prior = self
                    .store
                    .find_product_usage_by_idempotency(account.id, key)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::DataIntegrity(
                            "duplicate usage key reported but prior usage not found".into(),
                        )
                    })?;
                let inventory = self
                    .store
                    .find_product_inventory(account.id, &prior.product_type)
                    .await?;
                return Ok(ProductChargeOutcome::Duplicate(product_receipt_from_log(
                    prior,
                    account.paid_credits,
                    inventory.map(|inv| inv.total_uses).unwrap_or_default(),
                )));
            }
            return Err(err.into());
        }

        if used_main_pool {
            tx.update_account_balances(AccountBalanceUpdate {
                account_id: locked.id,
                paid_credits: main_after,
                free_uses_remaining: locked.free_uses_remaining,
                daily_free_uses_remaining: locked.daily_free_uses_remaining,
                daily_free_uses_reset_at: locked.daily_free_uses_reset_at,
                balance_minor: locked.balance_minor,
                total_uses: locked.total_uses + 1,
            })
            .await?;
            tx.insert_charge(NewCharge {
                id: Uuid::new_v4(),
                account_id: locked.id,
                amount_minor: intent.amount_minor,
                currency: locked.currency.clone(),
                balance_before: main_before,
                balance_after: main_after,
                description: format!("{} usage (main pool fallback)", intent.product_type),
                idempotency_key: intent
                    .idempotency_key
                    .as_deref()
                    .map(|key| format!("product:{}:{key}", intent.product_type)),
                metadata_message_id: None,
                metadata_agent_id: None,
                metadata_channel_id: None,
                metadata_request_id: intent.request_id.clone(),
            })
            .await?;
        }

        tx.update_inventory(InventoryUpdate {
            account_id: locked.id,
            product_type: intent.product_type.clone(),
            free_remaining: free_after,
            paid_credits: paid_after,
            total_uses: inventory.total_uses + 1,
            last_daily_refresh: if refresh_due {
                Some(now)
            } else {
                inventory.last_daily_refresh
            },
        })
        .await?;

        let verified = tx
            .get_inventory(locked.id, &intent.product_type)
            .await?
            .ok_or_else(|| LedgerError::WriteVerification("inventory disappeared".into()))?;
        if verified.free_remaining != free_after || verified.paid_credits != paid_after {
            return Err(LedgerError::WriteVerification(format!(
                "inventory mismatch for {}: expected {}/{}, got {}/{}",
                intent.product_type,
                free_after,
                paid_after,
                verified.free_remaining,
                verified.paid_credits
            )));
        }
        if used_main_pool {
            let verified_account = tx
                .get_account(locked.id)
                .await?
                .ok_or_else(|| LedgerError::WriteVerification("account disappeared".into()))?;
            self.verify_account_balances(
                &verified_account,
                main_after,
                locked.free_uses_remaining,
                locked.daily_free_uses_remaining,
                locked.balance_minor,
            )?;
        }

        tx.commit().await?;

        tracing::info!(
            account_id = %locked.id,
            product_type = %intent.product_type,
            used_free,
            used_paid,
            used_main_pool,
            cost_minor,
            "product charge"
        );

        Ok(ProductChargeOutcome::Created(ProductChargeReceipt {
            usage_id,
            account_id: AccountId(locked.id),
            product_type: intent.product_type,
            used_free,
            used_paid,
            used_main_pool,
            cost_minor,
            free_remaining: free_after,
            paid_credits: paid_after,
            main_paid_credits: main_after,
            total_uses: inventory.total_uses + 1,
        }))
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    /// Insert the account if absent, returning the canonical projection
    ///
    /// Never modifies balances of an existing account; profile fields are
    /// back-filled when first supplied.
    pub async fn get_or_create_account(
        &self,
        identity: &AccountIdentity,
        seed: AccountSeed,
    ) -> LedgerResult<AccountSummary> {
        identity
            .validate()
            .map_err(|e| LedgerError::Validation(e.to_string()))?;

        if let Some(existing) = self
            .store
            .find_account_by_identity(&identity.oauth_provider, &identity.external_id)
            .await?
        {
            if !seed.profile.is_empty() {
                self.store
                    .update_profile(existing.id, profile_patch(&seed.profile))
                    .await?;
            }
            return account_summary(existing);
        }

        let created = self
            .store
            .upsert_account(self.new_account(identity, &seed))
            .await?;
        account_summary(created)
    }

    /// Fetch an account by identity
    pub async fn get_account(&self, identity: &AccountIdentity) -> LedgerResult<AccountSummary> {
        identity
            .validate()
            .map_err(|e| LedgerError::Validation(e.to_string()))?;
        let row = self
            .store
            .read_account_by_identity(&identity.oauth_provider, &identity.external_id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;
        account_summary(row)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn new_account(&self, identity: &AccountIdentity, seed: &AccountSeed) -> NewAccount {
        NewAccount {
            id: Uuid::new_v4(),
            oauth_provider: identity.oauth_provider.clone(),
            external_id: identity.external_id.clone(),
            wa_id: identity.wa_id.clone(),
            tenant_id: identity.tenant_id.clone(),
            customer_email: seed.profile.customer_email.clone(),
            display_name: seed.profile.display_name.clone(),
            balance_minor: seed.initial_balance_minor,
            currency: seed
                .currency
                .clone()
                .unwrap_or_else(|| self.config.default_currency.clone()),
            plan_name: seed.plan_name.clone().unwrap_or_else(|| "free".to_string()),
            free_uses_remaining: self.config.free_uses_per_account,
            daily_free_uses_remaining: self.config.daily_free_uses_limit,
            daily_free_uses_limit: self.config.daily_free_uses_limit,
            status: AccountStatus::Active.as_str().to_string(),
            marketing_opt_in: seed.profile.marketing_opt_in,
            marketing_opt_in_source: seed.profile.marketing_opt_in_source.clone(),
            user_role: seed.profile.user_role.clone(),
            agent_id: seed.profile.agent_id.clone(),
        }
    }

    fn verify_account_balances(
        &self,
        verified: &AccountRow,
        expected_paid: i64,
        expected_free: i64,
        expected_daily: i64,
        expected_minor: i64,
    ) -> LedgerResult<()> {
        if verified.paid_credits != expected_paid {
            return Err(LedgerError::WriteVerification(format!(
                "paid credits mismatch: expected {expected_paid}, got {}",
                verified.paid_credits
            )));
        }
        if verified.free_uses_remaining != expected_free {
            return Err(LedgerError::WriteVerification(format!(
                "free uses mismatch: expected {expected_free}, got {}",
                verified.free_uses_remaining
            )));
        }
        if verified.daily_free_uses_remaining != expected_daily {
            return Err(LedgerError::WriteVerification(format!(
                "daily free uses mismatch: expected {expected_daily}, got {}",
                verified.daily_free_uses_remaining
            )));
        }
        if self.config.enforce_minor_balance && verified.balance_minor != expected_minor {
            return Err(LedgerError::WriteVerification(format!(
                "balance_minor mismatch: expected {expected_minor}, got {}",
                verified.balance_minor
            )));
        }
        Ok(())
    }
}

fn validate_amount(amount_minor: i64) -> LedgerResult<()> {
    if amount_minor <= 0 {
        return Err(LedgerError::Validation(format!(
            "amount_minor must be positive, got {amount_minor}"
        )));
    }
    Ok(())
}

fn validate_key(key: Option<&str>) -> LedgerResult<()> {
    if let Some(key) = key {
        validate_idempotency_key(key).map_err(|e| LedgerError::Validation(e.to_string()))?;
    }
    Ok(())
}

fn parse_status(account: &AccountRow) -> LedgerResult<AccountStatus> {
    account
        .status
        .parse()
        .map_err(|e: String| LedgerError::DataIntegrity(e))
}

fn profile_patch(profile: &AccountProfile) -> ProfilePatch {
    ProfilePatch {
        customer_email: profile.customer_email.clone(),
        display_name: profile.display_name.clone(),
        marketing_opt_in: profile.marketing_opt_in,
        marketing_opt_in_source: profile.marketing_opt_in_source.clone(),
        user_role: profile.user_role.clone(),
        agent_id: profile.agent_id.clone(),
    }
}

fn charge_receipt(row: ChargeRow) -> ChargeReceipt {
    ChargeReceipt {
        charge_id: ChargeId(row.id),
        account_id: AccountId(row.account_id),
        amount_minor: row.amount_minor,
        currency: row.currency,
        balance_before: row.balance_before,
        balance_after: row.balance_after,
        description: row.description,
        metadata: ChargeMetadata {
            message_id: row.metadata_message_id,
            agent_id: row.metadata_agent_id,
            channel_id: row.metadata_channel_id,
            request_id: row.metadata_request_id,
        },
        created_at: row.created_at,
    }
}

fn credit_receipt(row: CreditRow) -> LedgerResult<CreditReceipt> {
    let transaction_type = row
        .transaction_type
        .parse()
        .map_err(|e: String| LedgerError::DataIntegrity(e))?;
    Ok(CreditReceipt {
        credit_id: CreditId(row.id),
        account_id: AccountId(row.account_id),
        amount_minor: row.amount_minor,
        currency: row.currency,
        balance_before: row.balance_before,
        balance_after: row.balance_after,
        transaction_type,
        description: row.description,
        external_transaction_id: row.external_transaction_id,
        created_at: row.created_at,
    })
}

fn product_receipt_from_log(
    row: ProductUsageRow,
    main_paid_credits: i64,
    total_uses: i64,
) -> ProductChargeReceipt {
    let used_main_pool = !row.used_free && !row.used_paid;
    ProductChargeReceipt {
        usage_id: row.id,
        account_id: AccountId(row.account_id),
        product_type: row.product_type,
        used_free: row.used_free,
        used_paid: row.used_paid,
        used_main_pool,
        cost_minor: row.cost_minor,
        free_remaining: row.free_after,
        paid_credits: row.paid_after,
        main_paid_credits,
        total_uses,
    }
}

fn account_summary(row: AccountRow) -> LedgerResult<AccountSummary> {
    let status = parse_status(&row)?;
    // Present the daily pool at its post-reset value without writing.
    let now = Utc::now();
    let (daily_free, daily_reset_at) =
        if policy::daily_reset_due(row.daily_free_uses_reset_at, now) {
            (row.daily_free_uses_limit, Some(policy::next_daily_reset(now)))
        } else {
            (row.daily_free_uses_remaining, row.daily_free_uses_reset_at)
        };
    Ok(AccountSummary {
        account_id: AccountId(row.id),
        identity: row.identity(),
        customer_email: row.customer_email,
        display_name: row.display_name,
        balance_minor: row.balance_minor,
        currency: row.currency,
        plan_name: row.plan_name,
        status,
        paid_credits: row.paid_credits,
        free_uses_remaining: row.free_uses_remaining,
        daily_free_uses_remaining: daily_free,
        daily_free_uses_limit: row.daily_free_uses_limit,
        daily_free_uses_reset_at: daily_reset_at,
        total_uses: row.total_uses,
        marketing_opt_in: row.marketing_opt_in,
        marketing_opt_in_at: row.marketing_opt_in_at,
        marketing_opt_in_source: row.marketing_opt_in_source,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
