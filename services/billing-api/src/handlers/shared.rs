//! Shared handler utilities

use std::time::Instant;

use axum::http::{header::HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::{ErrorDetail, ErrorResponse};

/// Record ledger operation duration with result label.
#[inline]
pub fn record_op_duration(operation: &'static str, start: Instant, success: bool) {
    let result = if success { "ok" } else { "err" };
    metrics::histogram!(
        "billing_operation_duration_seconds",
        "operation" => operation,
        "result" => result
    )
    .record(start.elapsed().as_secs_f64());
}

/// Build the 409 response for an idempotency replay.
///
/// Well-behaved clients treat this as success; the prior resource id travels
/// in the hint header.
pub fn replay_response(header: &'static str, resource: &str, id: String) -> Response {
    let mut response = (
        StatusCode::CONFLICT,
        Json(ErrorResponse {
            error: ErrorDetail {
                code: "IDEMPOTENCY_REPLAY".to_string(),
                message: format!("{resource} already exists"),
                details: None,
            },
        }),
    )
        .into_response();

    if let Ok(value) = HeaderValue::from_str(&id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(header), value);
    }
    response
}
