//! Health check handler

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub timestamp: String,
}

/// GET /health
///
/// Liveness plus database reachability, for the load balancer.
pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => Ok(Json(HealthResponse {
            status: "healthy",
            database: "connected",
            timestamp: Utc::now().to_rfc3339(),
        })),
        Err(e) => {
            tracing::error!(error = ?e, "database health check failed");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    database: "disconnected",
                    timestamp: Utc::now().to_rfc3339(),
                }),
            ))
        }
    }
}
