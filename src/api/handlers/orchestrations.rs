//! Orchestration lifecycle handlers.
//!
//! Submission persists the intake record and hands execution to a background
//! driver; reads never mutate state.

use crate::{
    AppState,
    types::{Orchestration, OrchestrationDetail, OrchestrationStatus, Result, SubmitRequest},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

/// Query parameters for listing orchestrations.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListParams {
    /// Restrict the listing to one lifecycle status.
    pub status: Option<OrchestrationStatus>,
}

/// Submit a new orchestration
///
/// Creates the orchestration record and starts background execution: intent
/// classification, decomposition, and dispatch. Poll `GET
/// /orchestrations/{id}` for progress.
#[utoipa::path(
    post,
    path = "/orchestrations",
    request_body = SubmitRequest,
    responses(
        (status = 201, description = "Orchestration accepted", body = Orchestration),
        (status = 400, description = "Empty request text")
    ),
    tag = "orchestrations"
)]
pub async fn submit(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Orchestration>)> {
    let orchestration = state
        .engine
        .submit(&payload.request_text, payload.workflow_hint.as_deref())
        .await?;

    state.engine.clone().spawn_execution(orchestration.id.clone());

    Ok((StatusCode::CREATED, Json(orchestration)))
}

/// Get an orchestration
///
/// Returns status, per-subtask state, the failure cause when terminal-failed,
/// and aggregated results when completed.
#[utoipa::path(
    get,
    path = "/orchestrations/{id}",
    responses(
        (status = 200, description = "Orchestration detail", body = OrchestrationDetail),
        (status = 404, description = "Orchestration not found")
    ),
    params(("id" = String, Path, description = "Orchestration id")),
    tag = "orchestrations"
)]
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrchestrationDetail>> {
    let detail = state.engine.get_detail(&id).await?;
    Ok(Json(detail))
}

/// List orchestrations
#[utoipa::path(
    get,
    path = "/orchestrations",
    params(ListParams),
    responses(
        (status = 200, description = "Orchestrations", body = [Orchestration])
    ),
    tag = "orchestrations"
)]
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Orchestration>>> {
    let orchestrations = state.engine.list(params.status).await?;
    Ok(Json(orchestrations))
}

/// Cancel an orchestration
///
/// Stops issuing new dispatches; in-flight dispatches are abandoned and
/// already-succeeded subtasks are kept.
#[utoipa::path(
    post,
    path = "/orchestrations/{id}/cancel",
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 400, description = "Orchestration already terminal"),
        (status = 404, description = "Orchestration not found")
    ),
    params(("id" = String, Path, description = "Orchestration id")),
    tag = "orchestrations"
)]
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    state.engine.cancel(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "detail": "Cancellation requested" })),
    ))
}
