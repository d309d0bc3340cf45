//! Charge handlers

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use tollgate_core::{ChargeIntent, ChargeOutcome};
use tollgate_types::ChargeMetadata;

use super::shared::{record_op_duration, replay_response};
use super::IdentityParams;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateChargeRequest {
    #[serde(flatten)]
    pub identity: IdentityParams,
    pub amount_minor: i64,
    #[serde(default)]
    pub currency: Option<String>,
    pub description: String,
    #[serde(default)]
    pub metadata: Option<ChargeMetadata>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub charge_id: String,
    pub account_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: String,
    pub metadata: ChargeMetadata,
    pub created_at: String,
}

impl From<tollgate_core::ChargeReceipt> for ChargeResponse {
    fn from(receipt: tollgate_core::ChargeReceipt) -> Self {
        Self {
            charge_id: receipt.charge_id.to_string(),
            account_id: receipt.account_id.to_string(),
            amount_minor: receipt.amount_minor,
            currency: receipt.currency,
            balance_before: receipt.balance_before,
            balance_after: receipt.balance_after,
            description: receipt.description,
            metadata: receipt.metadata,
            created_at: receipt.created_at.to_rfc3339(),
        }
    }
}

/// POST /v1/billing/charges
///
/// Deduct one free use or `amount_minor` paid credits. Replays of a
/// previously seen idempotency key return 409 with the prior charge id in
/// `X-Existing-Charge-ID`.
pub async fn create_charge(
    State(state): State<AppState>,
    Json(req): Json<CreateChargeRequest>,
) -> ApiResult<Response> {
    let start = Instant::now();

    let intent = ChargeIntent {
        identity: req.identity.into_identity(),
        amount_minor: req.amount_minor,
        currency: req
            .currency
            .unwrap_or_else(|| state.config.ledger.default_currency.clone()),
        description: req.description,
        metadata: req.metadata.unwrap_or_default(),
        idempotency_key: req.idempotency_key,
    };

    let outcome = state
        .engine
        .create_charge(intent)
        .await
        .inspect_err(|_| record_op_duration("create_charge", start, false))?;

    metrics::counter!(
        "billing_charges_total",
        "result" => if outcome.is_duplicate() { "replayed" } else { "created" }
    )
    .increment(1);
    record_op_duration("create_charge", start, true);

    Ok(match outcome {
        ChargeOutcome::Created(receipt) => {
            (StatusCode::CREATED, Json(ChargeResponse::from(receipt))).into_response()
        }
        ChargeOutcome::Duplicate(receipt) => replay_response(
            "x-existing-charge-id",
            "Charge",
            receipt.charge_id.to_string(),
        ),
    })
}
