//! Health check handler.

use crate::AppState;
use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

/// Service health check
///
/// Reports degraded rather than failing when the database check errors, so
/// probes still get a body to act on.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Health status", body = HealthResponse)),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.store.connection() {
        Ok(conn) => match conn.query("SELECT 1", ()).await {
            Ok(_) => "ok",
            Err(_) => "error",
        },
        Err(_) => "error",
    };

    let status = if database == "ok" { "ok" } else { "degraded" };
    Json(HealthResponse { status, database })
}
