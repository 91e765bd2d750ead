/// Workflow listing endpoints
///
/// Read-only view of the definitions currently in the registry.

use crate::api::AppState;
use crate::workflow::WorkflowDefinition;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, Router},
};
use serde::Serialize;
use serde_json::{json, Value};

/// Summary row returned by the list endpoint
#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub events: Vec<String>,
    pub schedule: Option<String>,
    pub jobs: Vec<String>,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(definition: &WorkflowDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            events: definition.on.events.clone(),
            schedule: definition.cron_schedule().map(str::to_string),
            jobs: definition.job_names().into_iter().map(str::to_string).collect(),
        }
    }
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/{name}", get(get_workflow))
}

/// List all workflows
///
/// GET /api/workflows
/// Returns: { "workflows": [{ "name": "...", "events": [...], "schedule": "...", "jobs": [...] }] }
async fn list_workflows(State(state): State<AppState>) -> Json<Value> {
    let workflows: Vec<WorkflowSummary> = state
        .workflows
        .all()
        .iter()
        .map(|definition| WorkflowSummary::from(definition.as_ref()))
        .collect();

    Json(json!({ "workflows": workflows }))
}

/// Get a workflow definition by name
///
/// GET /api/workflows/{name}
async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WorkflowDefinition>, StatusCode> {
    match state.workflows.get(&name) {
        Some(definition) => Ok(Json(definition.as_ref().clone())),
        None => {
            tracing::debug!("🔍 Workflow not found: {}", name);
            Err(StatusCode::NOT_FOUND)
        }
    }
}
