//! Agent registration and lookup handlers.

use crate::{
    AppState,
    types::{Agent, AppError, RegisterAgentRequest, Result},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

/// Query parameters for listing agents.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListParams {
    /// Only agents declaring this capability tag.
    pub capability: Option<String>,
}

/// Register a new agent
///
/// The agent starts active with the configured initial reputation.
#[utoipa::path(
    post,
    path = "/agents",
    request_body = RegisterAgentRequest,
    responses(
        (status = 201, description = "Agent registered", body = Agent),
        (status = 400, description = "Empty capability set or invalid endpoint")
    ),
    tag = "agents"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterAgentRequest>,
) -> Result<(StatusCode, Json<Agent>)> {
    let agent = state.engine.registry().register(payload).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

/// List agents
///
/// Includes inactive agents; ordering is registration order.
#[utoipa::path(
    get,
    path = "/agents",
    params(ListParams),
    responses((status = 200, description = "Agents", body = [Agent])),
    tag = "agents"
)]
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Agent>>> {
    let agents = state.engine.registry().list(params.capability.as_deref());
    Ok(Json(agents))
}

/// Get an agent
#[utoipa::path(
    get,
    path = "/agents/{id}",
    responses(
        (status = 200, description = "Agent", body = Agent),
        (status = 404, description = "Agent not found")
    ),
    params(("id" = String, Path, description = "Agent id")),
    tag = "agents"
)]
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Agent>> {
    state
        .engine
        .registry()
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Agent '{}' not found", id)))
}

/// Deactivate an agent
///
/// The agent stops matching capability queries; orchestrations already bound
/// to it are unaffected.
#[utoipa::path(
    post,
    path = "/agents/{id}/deactivate",
    responses(
        (status = 200, description = "Agent deactivated"),
        (status = 404, description = "Agent not found")
    ),
    params(("id" = String, Path, description = "Agent id")),
    tag = "agents"
)]
pub async fn deactivate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.engine.registry().deactivate(&id).await?;
    Ok(Json(serde_json::json!({ "detail": "Agent deactivated" })))
}

/// Reactivate an agent
#[utoipa::path(
    post,
    path = "/agents/{id}/reactivate",
    responses(
        (status = 200, description = "Agent reactivated"),
        (status = 404, description = "Agent not found")
    ),
    params(("id" = String, Path, description = "Agent id")),
    tag = "agents"
)]
pub async fn reactivate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.engine.registry().reactivate(&id).await?;
    Ok(Json(serde_json::json!({ "detail": "Agent reactivated" })))
}
