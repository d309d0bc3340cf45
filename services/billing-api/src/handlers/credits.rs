//! Credit check and credit addition handlers

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use tollgate_core::{CreditIntent, CreditOutcome};
use tollgate_types::{CreditCheckContext, TransactionType};

use super::shared::{record_op_duration, replay_response};
use super::{IdentityParams, ProfileParams};
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreditCheckRequest {
    #[serde(flatten)]
    pub identity: IdentityParams,
    #[serde(default)]
    pub context: Option<CreditCheckContext>,
    #[serde(flatten)]
    pub profile: ProfileParams,
}

#[derive(Debug, Serialize)]
pub struct CreditCheckResponse {
    pub has_credit: bool,
    pub credits_remaining: i64,
    pub free_uses_remaining: i64,
    pub daily_free_uses_remaining: i64,
    pub daily_free_uses_limit: i64,
    pub total_uses: i64,
    pub plan_name: String,
    pub purchase_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_price_minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_uses: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// POST /v1/billing/credits/check
///
/// Authorisation decision. Auto-creates new accounts with free credits on
/// first sight.
pub async fn check_credit(
    State(state): State<AppState>,
    Json(req): Json<CreditCheckRequest>,
) -> ApiResult<Json<CreditCheckResponse>> {
    let start = Instant::now();

    let identity = req.identity.into_identity();
    let summary = state
        .engine
        .check_credit(&identity, req.context.as_ref(), &req.profile.into_profile())
        .await
        .inspect_err(|_| record_op_duration("check_credit", start, false))?;

    metrics::counter!(
        "billing_credit_checks_total",
        "result" => if summary.has_credit { "allowed" } else { "denied" }
    )
    .increment(1);
    record_op_duration("check_credit", start, true);

    Ok(Json(CreditCheckResponse {
        has_credit: summary.has_credit,
        credits_remaining: summary.credits_remaining,
        free_uses_remaining: summary.free_uses_remaining,
        daily_free_uses_remaining: summary.daily_free_uses_remaining,
        daily_free_uses_limit: summary.daily_free_uses_limit,
        total_uses: summary.total_uses,
        plan_name: summary.plan_name,
        purchase_required: summary.purchase_required,
        purchase_price_minor: summary.purchase_hint.map(|h| h.price_minor),
        purchase_uses: summary.purchase_hint.map(|h| h.uses),
        reason: summary.reason,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddCreditsRequest {
    #[serde(flatten)]
    pub identity: IdentityParams,
    pub amount_minor: i64,
    #[serde(default)]
    pub currency: Option<String>,
    pub transaction_type: TransactionType,
    pub description: String,
    #[serde(default)]
    pub external_transaction_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreditResponse {
    pub credit_id: String,
    pub account_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub transaction_type: TransactionType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_transaction_id: Option<String>,
    pub created_at: String,
}

impl From<tollgate_core::CreditReceipt> for CreditResponse {
    fn from(receipt: tollgate_core::CreditReceipt) -> Self {
        Self {
            credit_id: receipt.credit_id.to_string(),
            account_id: receipt.account_id.to_string(),
            amount_minor: receipt.amount_minor,
            currency: receipt.currency,
            balance_before: receipt.balance_before,
            balance_after: receipt.balance_after,
            transaction_type: receipt.transaction_type,
            description: receipt.description,
            external_transaction_id: receipt.external_transaction_id,
            created_at: receipt.created_at.to_rfc3339(),
        }
    }
}

/// POST /v1/billing/credits
///
/// Admin / grant / internal credit addition.
pub async fn add_credits(
    State(state): State<AppState>,
    Json(req): Json<AddCreditsRequest>,
) -> ApiResult<Response> {
    let start = Instant::now();

    let intent = CreditIntent {
        identity: req.identity.into_identity(),
        amount_minor: req.amount_minor,
        currency: req
            .currency
            .unwrap_or_else(|| state.config.ledger.default_currency.clone()),
        transaction_type: req.transaction_type,
        description: req.description,
        external_transaction_id: req.external_transaction_id,
        idempotency_key: req.idempotency_key,
    };

    let outcome = state
        .engine
        .add_credits(intent)
        .await
        .inspect_err(|_| record_op_duration("add_credits", start, false))?;

    metrics::counter!(
        "billing_credits_total",
        "result" => if outcome.is_duplicate() { "replayed" } else { "created" }
    )
    .increment(1);
    record_op_duration("add_credits", start, true);

    Ok(match outcome {
        CreditOutcome::Created(receipt) => {
            (StatusCode::CREATED, Json(CreditResponse::from(receipt))).into_response()
        }
        CreditOutcome::Duplicate(receipt) => replay_response(
            "x-existing-credit-id",
            "Credit",
            receipt.credit_id.to_string(),
        ),
    })
}
