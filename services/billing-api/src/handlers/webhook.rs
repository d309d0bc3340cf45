//! Provider webhook handler

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use tollgate_core::{LedgerError, ReconcileOutcome};

use super::shared::record_op_duration;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    pub event_id: String,
}

/// POST /v1/billing/webhooks/{provider}
///
/// Provider-signed event ingress. Authentication is the provider signature;
/// nothing is credited before verification passes.
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    if provider != state.provider.name() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
    else {
        tracing::warn!("missing or unreadable signature header");
        metrics::counter!("billing_webhooks_processed_total", "status" => "missing_signature")
            .increment(1);
        record_op_duration("process_webhook", start, false);
        return StatusCode::BAD_REQUEST.into_response();
    };

    let event = match state.provider.verify_webhook(&body, signature).await {
        Ok(event) => event,
        Err(LedgerError::SignatureInvalid(reason)) => {
            tracing::warn!(reason = %reason, "webhook signature rejected");
            metrics::counter!("billing_webhooks_processed_total", "status" => "signature_invalid")
                .increment(1);
            record_op_duration("process_webhook", start, false);
            return StatusCode::BAD_REQUEST.into_response();
        }
        Err(err) => {
            tracing::warn!(error = %err, "webhook payload rejected");
            metrics::counter!("billing_webhooks_processed_total", "status" => "parse_error")
                .increment(1);
            record_op_duration("process_webhook", start, false);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let event_id = event.event_id().to_string();
    match state.reconciler.process(event).await {
        Ok(outcome) => {
            let (status, label) = match outcome {
                ReconcileOutcome::Credited { .. } => ("success", "credited"),
                ReconcileOutcome::AlreadyFulfilled => ("success", "duplicate"),
                ReconcileOutcome::MarkedFailed => ("acknowledged", "failed"),
                ReconcileOutcome::Ignored => ("ignored", "ignored"),
            };
            metrics::counter!("billing_webhooks_processed_total", "status" => label).increment(1);
            record_op_duration("process_webhook", start, true);
            (StatusCode::OK, Json(WebhookAck { status, event_id })).into_response()
        }
        Err(err) => {
            tracing::error!(error = ?err, event_id = %event_id, "webhook processing failed");
            metrics::counter!("billing_webhooks_processed_total", "status" => "error").increment(1);
            record_op_duration("process_webhook", start, false);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
