//! Purchase handlers

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tollgate_core::{AccountSeed, LedgerError, PaymentIntentSpec};
use tollgate_db::{LedgerStore, NewPayment};
use tollgate_types::PaymentStatus;

use super::shared::record_op_duration;
use super::{IdentityParams, ProfileParams};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    #[serde(flatten)]
    pub identity: IdentityParams,
    #[serde(flatten)]
    pub profile: ProfileParams,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub payment_id: String,
    pub client_secret: String,
    pub amount_minor: i64,
    pub currency: String,
    pub uses_purchased: i64,
    pub status: String,
}

/// POST /v1/billing/purchases
///
/// Create a payment intent for purchasing additional uses and record it so
/// webhook reconciliation can find the account later.
pub async fn create_purchase(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> ApiResult<(StatusCode, Json<PurchaseResponse>)> {
    let start = Instant::now();
    let config = &state.config.ledger;

    let identity = req.identity.into_identity();
    let customer_email = req.profile.customer_email.clone();
    let account = state
        .engine
        .get_or_create_account(
            &identity,
            AccountSeed {
                profile: req.profile.into_profile(),
                ..AccountSeed::default()
            },
        )
        .await?;

    // Timestamped so repeated purchase attempts create distinct intents.
    let idempotency_key = format!(
        "purchase-{}-{}",
        account.account_id,
        Utc::now().timestamp()
    );
    let spec = PaymentIntentSpec {
        amount_minor: config.price_per_purchase_minor,
        currency: config.default_currency.clone(),
        description: format!("Purchase {} uses", config.paid_uses_per_purchase),
        customer_email,
        account_id: account.account_id,
        oauth_provider: identity.oauth_provider.clone(),
        external_id: identity.external_id.clone(),
        idempotency_key,
    };

    let handle = state
        .provider
        .create_payment_intent(&spec)
        .await
        .inspect_err(|_| {
            record_op_duration("create_purchase", start, false);
        })?;

    // Best-effort record; the webhook path can reconstruct the account from
    // provider metadata if this insert is lost.
    let status = handle
        .status
        .parse::<PaymentStatus>()
        .unwrap_or(PaymentStatus::RequiresPaymentMethod);
    if let Err(err) = state
        .engine
        .store()
        .insert_payment(NewPayment {
            id: Uuid::new_v4(),
            provider: state.provider.name().to_string(),
            external_id: handle.payment_id.clone(),
            account_id: account.account_id.0,
            amount_minor: handle.amount_minor,
            currency: handle.currency.clone(),
            status: status.as_str().to_string(),
        })
        .await
    {
        tracing::warn!(error = %err, payment_id = %handle.payment_id, "failed to record payment");
    }

    metrics::counter!("billing_purchases_created_total").increment(1);
    record_op_duration("create_purchase", start, true);

    Ok((
        StatusCode::CREATED,
        Json(PurchaseResponse {
            payment_id: handle.payment_id,
            client_secret: handle.client_secret,
            amount_minor: handle.amount_minor,
            currency: handle.currency,
            uses_purchased: config.paid_uses_per_purchase,
            status: handle.status,
        }),
    ))
}

/// GET /v1/billing/purchases/{payment_id}
///
/// Poll payment status after initiating a purchase.
pub async fn get_purchase_status(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> ApiResult<Json<PurchaseResponse>> {
    let handle = state
        .provider
        .get_payment_status(&payment_id)
        .await
        .map_err(|err| match err {
            LedgerError::Provider(_) => ApiError::PaymentNotFound(payment_id.clone()),
            other => other.into(),
        })?;

    Ok(Json(PurchaseResponse {
        payment_id: handle.payment_id,
        client_secret: handle.client_secret,
        amount_minor: handle.amount_minor,
        currency: handle.currency,
        uses_purchased: state.config.ledger.paid_uses_per_purchase,
        status: handle.status,
    }))
}
