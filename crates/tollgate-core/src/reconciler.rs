//! Webhook reconciler
//!
//! Turns verified provider events into at-most-once ledger effects. The
//! guarantee rests on two keys: the `(provider, external_id)` unique payment
//! record and the credit idempotency key, which is the provider's external
//! transaction id.

use std::sync::Arc;

use uuid::Uuid;

use tollgate_db::{LedgerStore, NewPayment};
use tollgate_types::{AccountIdentity, CreditId, PaymentStatus, TransactionType};

use crate::engine::{CreditIntent, LedgerEngine};
use crate::error::{LedgerError, LedgerResult};
use crate::provider::ProviderEvent;

/// What a delivery amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Fresh credit applied
    Credited { credit_id: CreditId },
    /// Duplicate delivery; the ledger already holds the credit
    AlreadyFulfilled,
    /// Payment record marked failed, no ledger effect
    MarkedFailed,
    /// Verified but no action taken
    Ignored,
}

/// Reconciles provider events against the ledger
pub struct WebhookReconciler<S> {
    engine: Arc<LedgerEngine<S>>,
    provider_name: String,
}

impl<S: LedgerStore> WebhookReconciler<S> {
    /// Create a reconciler for one provider's event stream
    pub fn new(engine: Arc<LedgerEngine<S>>, provider_name: impl Into<String>) -> Self {
        Self {
            engine,
            provider_name: provider_name.into(),
        }
    }

    /// Apply a verified event
    pub async fn process(&self, event: ProviderEvent) -> LedgerResult<ReconcileOutcome> {
        match event {
            ProviderEvent::PaymentSucceeded {
                event_id,
                external_id,
                amount_minor,
                currency,
                identity,
            } => {
                self.handle_success(&event_id, &external_id, amount_minor, currency, identity)
                    .await
            }
            ProviderEvent::PaymentFailed {
                event_id,
                external_id,
                reason,
            } => self.handle_failure(&event_id, &external_id, reason).await,
            ProviderEvent::Refund {
                event_id,
                external_id,
                amount_minor,
            } => {
                // Logged only; credit clawback is deliberately not performed.
                tracing::warn!(
                    event_id = %event_id,
                    external_id = %external_id,
                    amount_minor,
                    "refund event received, no ledger effect"
                );
                Ok(ReconcileOutcome::Ignored)
            }
            ProviderEvent::Ignored { event_id, kind } => {
                tracing::debug!(event_id = %event_id, kind = %kind, "webhook event ignored");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    async fn handle_success(
        &self,
        event_id: &str,
        external_id: &str,
        amount_minor: Option<i64>,
        currency: Option<String>,
        identity: Option<AccountIdentity>,
    ) -> LedgerResult<ReconcileOutcome> {
        let store = self.engine.store();
        let config = self.engine.config();

        let payment = store
            .find_payment_by_external_id(&self.provider_name, external_id)
            .await?;

        if let Some(record) = &payment {
            if record.is_fulfilled() {
                tracing::info!(
                    event_id = %event_id,
                    external_id = %external_id,
                    "duplicate payment webhook, already fulfilled"
                );
                return Ok(ReconcileOutcome::AlreadyFulfilled);
            }
        }

        let identity = match identity {
            Some(identity) => identity,
            None => {
                // No metadata on the event; fall back to the payment record.
                let record = payment.as_ref().ok_or_else(|| {
                    LedgerError::Validation(format!(
                        "payment {external_id} succeeded without account metadata"
                    ))
                })?;
                store
                    .find_account_by_id(record.account_id)
                    .await?
                    .map(|row| row.identity())
                    .ok_or(LedgerError::AccountNotFound)?
            }
        };

        let uses = config.paid_uses_per_purchase;
        let outcome = self
            .engine
            .add_credits(CreditIntent {
                identity,
                amount_minor: uses,
                currency: config.default_currency.clone(),
                transaction_type: TransactionType::Purchase,
                description: format!("Purchased {uses} uses via {}", self.provider_name),
                external_transaction_id: Some(external_id.to_string()),
                idempotency_key: Some(external_id.to_string()),
            })
            .await?;

        let receipt = outcome.receipt();
        match payment {
            Some(record) => {
                store
                    .update_payment(
                        record.id,
                        PaymentStatus::Succeeded.as_str(),
                        Some(receipt.credit_id.0),
                    )
                    .await?;
            }
            None => {
                let record = store
                    .insert_payment(NewPayment {
                        id: Uuid::new_v4(),
                        provider: self.provider_name.clone(),
                        external_id: external_id.to_string(),
                        account_id: receipt.account_id.0,
                        amount_minor: amount_minor.unwrap_or(config.price_per_purchase_minor),
                        currency: currency.unwrap_or_else(|| config.default_currency.clone()),
                        status: PaymentStatus::Succeeded.as_str().to_string(),
                    })
                    .await?;
                store
                    .update_payment(
                        record.id,
                        PaymentStatus::Succeeded.as_str(),
                        Some(receipt.credit_id.0),
                    )
                    .await?;
            }
        }

        if outcome.is_duplicate() {
            tracing::info!(
                event_id = %event_id,
                external_id = %external_id,
                credit_id = %receipt.credit_id,
                "duplicate payment webhook, credit replayed"
            );
            Ok(ReconcileOutcome::AlreadyFulfilled)
        } else {
            tracing::info!(
                event_id = %event_id,
                external_id = %external_id,
                credit_id = %receipt.credit_id,
                uses,
                "payment credited"
            );
            Ok(ReconcileOutcome::Credited {
                credit_id: receipt.credit_id,
            })
        }
    }

    async fn handle_failure(
        &self,
        event_id: &str,
        external_id: &str,
        reason: Option<String>,
    ) -> LedgerResult<ReconcileOutcome> {
        let store = self.engine.store();
        tracing::warn!(
            event_id = %event_id,
            external_id = %external_id,
            reason = reason.as_deref().unwrap_or("unknown"),
            "payment failed"
        );

        match store
            .find_payment_by_external_id(&self.provider_name, external_id)
            .await?
        {
            Some(record) if !record.is_fulfilled() => {
                store
                    .update_payment(record.id, PaymentStatus::Failed.as_str(), None)
                    .await?;
                Ok(ReconcileOutcome::MarkedFailed)
            }
            Some(_) => Ok(ReconcileOutcome::AlreadyFulfilled),
            None => Ok(ReconcileOutcome::Ignored),
        }
    }
}
