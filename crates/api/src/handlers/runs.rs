use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use engine::{ExecutionRun, TraceEntry};
use store::RunRecord;

use super::AppState;
use crate::ApiError;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<RunRecord>>, ApiError> {
    let records = state
        .store
        .list_runs()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(Json(records))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ExecutionRun>, ApiError> {
    Ok(Json(state.engine.run(id).await?))
}

#[derive(serde::Deserialize)]
pub struct TraceQuery {
    pub step_id: Option<String>,
}

pub async fn trace(
    Path(id): Path<Uuid>,
    Query(query): Query<TraceQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<TraceEntry>>, ApiError> {
    let entries = match query.step_id.as_deref() {
        Some(step_id) => state.engine.step_trace(id, step_id).await?,
        None => state.engine.trace(id).await?,
    };
    Ok(Json(entries))
}

pub async fn cancel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if state.engine.cancel(id).await {
        Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "message": "cancellation requested" })),
        ))
    } else {
        Err(ApiError::NotFound(format!("live run {id}")))
    }
}
