/// Event trigger endpoint
///
/// `POST /events/{event_id}` starts every job of every workflow listening to the
/// event. The request body becomes the run input.

use crate::api::AppState;
use crate::error::Error;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{post, Router},
};
use serde_json::{json, Value};

pub fn create_event_routes() -> Router<AppState> {
    Router::new().route("/events/{event_id}", post(trigger_event))
}

/// Trigger an event
///
/// POST /events/{event_id}
/// Body: JSON object passed to every started run (empty body = `{}`)
async fn trigger_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    body: String,
) -> (StatusCode, Json<Value>) {
    tracing::info!("📥 Event received: {}", event_id);
    tracing::debug!("📄 Request body: {}", body);

    // Parse JSON body manually to handle errors gracefully
    let payload: Value = if body.trim().is_empty() {
        json!({})
    } else {
        match serde_json::from_str(&body) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("❌ Invalid JSON payload for event {}: {}", event_id, e);
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("invalid JSON body: {}", e) })),
                );
            }
        }
    };

    let triggered_at = chrono::Utc::now().to_rfc3339();

    match state.dispatcher.trigger(&event_id, &payload).await {
        Ok(handles) => {
            tracing::info!("🚀 Event {} started {} run(s)", event_id, handles.len());
            let started: Vec<Value> = handles
                .iter()
                .map(|handle| {
                    json!({
                        "workflowId": handle.workflow_id,
                        "runId": handle.run_id.to_string(),
                        "queue": handle.queue,
                    })
                })
                .collect();

            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "event": event_id,
                    "triggeredAt": triggered_at,
                    "started": started,
                })),
            )
        }
        Err(Error::Dispatch(outcome)) => {
            tracing::error!("❌ Event {} partially failed: {}", event_id, outcome);
            let failures: Vec<Value> = outcome
                .failures
                .iter()
                .map(|failure| {
                    json!({
                        "workflow": failure.workflow,
                        "job": failure.job,
                        "error": failure.error.to_string(),
                    })
                })
                .collect();

            // 422 for job failures vs 500 for system errors
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "event": event_id,
                    "triggeredAt": triggered_at,
                    "started": outcome.succeeded,
                    "failures": failures,
                })),
            )
        }
        Err(e) => {
            tracing::error!("❌ Event {} could not be dispatched: {}", event_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}
