use std::collections::HashMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use engine::{ExecutionRun, Workflow};

use super::AppState;
use crate::ApiError;

#[derive(serde::Deserialize)]
pub struct SubmitWorkflowDto {
    pub workflow: Workflow,
    #[serde(default)]
    pub seed_context: HashMap<String, Value>,
}

#[derive(serde::Serialize)]
pub struct SubmittedDto {
    pub run_id: Uuid,
}

/// Execute synchronously; the response is the completed run.
pub async fn execute(
    State(state): State<AppState>,
    Json(payload): Json<SubmitWorkflowDto>,
) -> Result<Json<ExecutionRun>, ApiError> {
    let run = state
        .engine
        .execute_workflow(&payload.workflow, payload.seed_context)
        .await?;
    Ok(Json(run))
}

/// Execute in the background; the response carries the run id for polling.
pub async fn submit(
    State(state): State<AppState>,
    Json(payload): Json<SubmitWorkflowDto>,
) -> Result<(StatusCode, Json<SubmittedDto>), ApiError> {
    let run_id = state
        .engine
        .clone()
        .submit(payload.workflow, payload.seed_context)?;
    Ok((StatusCode::ACCEPTED, Json(SubmittedDto { run_id })))
}
