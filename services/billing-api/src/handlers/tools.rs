//! Product-scoped charge handler

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use tollgate_core::{ProductChargeIntent, ProductChargeReceipt};

use super::shared::record_op_duration;
use super::IdentityParams;
use crate::error::ApiResult;
use crate::state::AppState;

fn default_amount() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ToolChargeRequest {
    #[serde(flatten)]
    pub identity: IdentityParams,
    pub product_type: String,
    #[serde(default = "default_amount")]
    pub amount_minor: i64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ToolChargeResponse {
    pub success: bool,
    pub has_credit: bool,
    pub used_free: bool,
    pub used_paid: bool,
    pub used_main_pool: bool,
    pub cost_minor: i32,
    pub free_remaining: i32,
    pub paid_credits: i32,
    pub main_pool_credits: i64,
    pub total_uses: i64,
}

impl From<ProductChargeReceipt> for ToolChargeResponse {
    fn from(receipt: ProductChargeReceipt) -> Self {
        let has_credit = receipt.free_remaining > 0
            || receipt.paid_credits > 0
            || receipt.main_paid_credits > 0;
        Self {
            success: true,
            has_credit,
            used_free: receipt.used_free,
            used_paid: receipt.used_paid,
            used_main_pool: receipt.used_main_pool,
            cost_minor: receipt.cost_minor,
            free_remaining: receipt.free_remaining,
            paid_credits: receipt.paid_credits,
            main_pool_credits: receipt.main_paid_credits,
            total_uses: receipt.total_uses,
        }
    }
}

/// POST /v1/tools/charge
///
/// Charge one product use: product free pool, then product paid pool, then
/// the account's main pool. Replays return the original result.
pub async fn charge_tool(
    State(state): State<AppState>,
    Json(req): Json<ToolChargeRequest>,
) -> ApiResult<(StatusCode, Json<ToolChargeResponse>)> {
    let start = Instant::now();

    let product_type = req.product_type.clone();
    let outcome = state
        .engine
        .charge_product(ProductChargeIntent {
            identity: req.identity.into_identity(),
            product_type: req.product_type,
            amount_minor: req.amount_minor,
            idempotency_key: req.idempotency_key,
            request_id: req.request_id,
        })
        .await
        .inspect_err(|_| record_op_duration("charge_tool", start, false))?;

    metrics::counter!(
        "billing_product_charges_total",
        "product_type" => product_type,
        "result" => if outcome.is_duplicate() { "replayed" } else { "created" }
    )
    .increment(1);
    record_op_duration("charge_tool", start, true);

    let receipt = outcome.receipt().clone();
    Ok((StatusCode::CREATED, Json(ToolChargeResponse::from(receipt))))
}
