/// HTTP API Layer
///
/// REST endpoints for triggering events and inspecting loaded workflows:
/// - Event triggers that start runs
/// - Read-only workflow listing
/// - Health check

// Event trigger endpoint
pub mod events;

// Workflow listing endpoints
pub mod workflows;

use crate::dispatch::Dispatcher;
use crate::workflow::WorkflowRegistry;
use axum::{routing::get, Router};
use std::sync::Arc;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub workflows: Arc<WorkflowRegistry>,
}

/// Build the full router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(events::create_event_routes())
        .merge(workflows::create_workflow_routes())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
