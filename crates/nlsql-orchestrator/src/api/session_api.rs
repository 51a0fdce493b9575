use axum::{extract::State, Json};

use crate::api::ApiResult;
use crate::context_engine::ConnectReport;
use crate::knowledge_db::DatabaseStats;
use crate::session::SessionState;
use crate::shared_state::AppState;

pub async fn get_session(State(state): State<AppState>) -> Json<SessionState> {
    Json(state.orchestrator.session_state())
}

pub async fn reconnect(State(state): State<AppState>) -> Json<ConnectReport> {
    Json(state.orchestrator.connect().await)
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<DatabaseStats> {
    Ok(Json(state.orchestrator.stats()?))
}
