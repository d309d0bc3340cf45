//! Account handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use tollgate_core::{AccountSeed, AccountSummary};
use tollgate_types::AccountIdentity;

use super::{IdentityParams, ProfileParams};
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    #[serde(flatten)]
    pub identity: IdentityParams,
    #[serde(default)]
    pub initial_balance_minor: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub plan_name: Option<String>,
    #[serde(flatten)]
    pub profile: ProfileParams,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account_id: String,
    pub oauth_provider: String,
    pub external_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wa_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub balance_minor: i64,
    pub currency: String,
    pub plan_name: String,
    pub status: String,
    pub paid_credits: i64,
    pub free_uses_remaining: i64,
    pub total_uses: i64,
    pub marketing_opt_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marketing_opt_in_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marketing_opt_in_source: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<AccountSummary> for AccountResponse {
    fn from(summary: AccountSummary) -> Self {
        Self {
            account_id: summary.account_id.to_string(),
            oauth_provider: summary.identity.oauth_provider,
            external_id: summary.identity.external_id,
            wa_id: summary.identity.wa_id,
            tenant_id: summary.identity.tenant_id,
            customer_email: summary.customer_email,
            display_name: summary.display_name,
            balance_minor: summary.balance_minor,
            currency: summary.currency,
            plan_name: summary.plan_name,
            status: summary.status.as_str().to_string(),
            paid_credits: summary.paid_credits,
            free_uses_remaining: summary.free_uses_remaining,
            total_uses: summary.total_uses,
            marketing_opt_in: summary.marketing_opt_in,
            marketing_opt_in_at: summary.marketing_opt_in_at.map(|t| t.to_rfc3339()),
            marketing_opt_in_source: summary.marketing_opt_in_source,
            created_at: summary.created_at.to_rfc3339(),
            updated_at: summary.updated_at.to_rfc3339(),
        }
    }
}

/// POST /v1/billing/accounts
///
/// Upsert: inserts if absent, returns the existing row untouched otherwise.
pub async fn upsert_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> ApiResult<(StatusCode, Json<AccountResponse>)> {
    let identity = req.identity.into_identity();
    let summary = state
        .engine
        .get_or_create_account(
            &identity,
            AccountSeed {
                initial_balance_minor: req.initial_balance_minor,
                currency: req.currency,
                plan_name: req.plan_name,
                profile: req.profile.into_profile(),
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(AccountResponse::from(summary))))
}

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    #[serde(default)]
    pub wa_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// GET /v1/billing/accounts/{provider}/{external_id}
pub async fn get_account(
    State(state): State<AppState>,
    Path((oauth_provider, external_id)): Path<(String, String)>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Json<AccountResponse>> {
    let identity = AccountIdentity {
        oauth_provider,
        external_id,
        wa_id: query.wa_id,
        tenant_id: query.tenant_id,
    };
    let summary = state.engine.get_account(&identity).await?;
    Ok(Json(AccountResponse::from(summary)))
}
