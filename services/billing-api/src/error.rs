//! Error types for the Billing API service.
//!
//! The ledger engine surfaces typed variants; this module is the only place
//! they are mapped onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tollgate_core::LedgerError;

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Account not found")]
    AccountNotFound,

    #[error("Account suspended: {0}")]
    AccountSuspended(String),

    #[error("Account is closed")]
    AccountClosed,

    #[error("Insufficient credits")]
    InsufficientCredits {
        balance: i64,
        required: i64,
        purchase_price_minor: Option<i64>,
        purchase_uses: Option<i64>,
    },

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Invalid webhook signature")]
    SignatureInvalid,

    #[error("Payment provider unavailable")]
    ProviderUnavailable,

    #[error("Service unavailable")]
    ServiceUnavailable,

    #[error("Internal error")]
    Internal(#[source] LedgerError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AccountNotFound | Self::PaymentNotFound(_) => StatusCode::NOT_FOUND,
            Self::AccountSuspended(_) | Self::AccountClosed => StatusCode::FORBIDDEN,
            Self::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::SignatureInvalid => StatusCode::BAD_REQUEST,
            Self::ProviderUnavailable | Self::ServiceUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::AccountSuspended(_) => "ACCOUNT_SUSPENDED",
            Self::AccountClosed => "ACCOUNT_CLOSED",
            Self::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientCredits {
                balance,
                required,
                purchase_price_minor,
                purchase_uses,
            } => Some(serde_json::json!({
                "balance": balance,
                "required": required,
                "purchase_required": true,
                "purchase_price_minor": purchase_price_minor,
                "purchase_uses": purchase_uses,
            })),
            _ => None,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(msg) => Self::Validation(msg),
            LedgerError::AccountNotFound => Self::AccountNotFound,
            LedgerError::AccountSuspended(reason) => Self::AccountSuspended(reason),
            LedgerError::AccountClosed => Self::AccountClosed,
            LedgerError::InsufficientCredits {
                balance,
                required,
                hint,
            } => Self::InsufficientCredits {
                balance,
                required,
                purchase_price_minor: hint.map(|h| h.price_minor),
                purchase_uses: hint.map(|h| h.uses),
            },
            LedgerError::SignatureInvalid(_) => Self::SignatureInvalid,
            LedgerError::Provider(_) => Self::ProviderUnavailable,
            LedgerError::Unavailable(_) => Self::ServiceUnavailable,
            err @ (LedgerError::WriteVerification(_)
            | LedgerError::DataIntegrity(_)
            | LedgerError::Database(_)) => Self::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Write-verification and integrity failures must trigger alerting.
        if let Self::Internal(source) = &self {
            tracing::error!(error = ?source, "internal API error");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
