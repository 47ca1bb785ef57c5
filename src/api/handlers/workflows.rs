//! Workflow template handlers.

use crate::{
    AppState,
    types::{Result, WorkflowSummary},
};
use axum::{Json, extract::State};

/// List workflow templates
///
/// Returns the summaries of every template declared in configuration.
#[utoipa::path(
    get,
    path = "/workflows",
    responses((status = 200, description = "Workflow summaries", body = [WorkflowSummary])),
    tag = "workflows"
)]
pub async fn list_workflows(State(state): State<AppState>) -> Result<Json<Vec<WorkflowSummary>>> {
    Ok(Json(state.engine.catalog().summaries()))
}
