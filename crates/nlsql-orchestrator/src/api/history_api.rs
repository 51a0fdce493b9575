//! Saved-query history endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::api::{ApiError, ApiResult};
use crate::knowledge_db::HistoryEntry;
use crate::shared_state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryBody {
    pub name: String,
    pub query: String,
}

pub async fn list_history(State(state): State<AppState>) -> ApiResult<Vec<HistoryEntry>> {
    Ok(Json(state.orchestrator.history()?))
}

pub async fn save_history(State(state): State<AppState>, Json(body): Json<HistoryBody>) -> ApiResult<HistoryEntry> {
    Ok(Json(state.orchestrator.save_history(&body.name, &body.query)?))
}

pub async fn update_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<HistoryBody>,
) -> ApiResult<HistoryEntry> {
    Ok(Json(state.orchestrator.update_history(id, &body.name, &body.query)?))
}

pub async fn delete_history(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    if state.orchestrator.delete_history(id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}
