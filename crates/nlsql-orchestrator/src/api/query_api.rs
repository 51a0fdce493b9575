//! Query submission endpoints

use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Deserialize;
use tracing::info;

use crate::api::status_for;
use crate::context_engine::{QueryOutcome, Submission};
use crate::shared_state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitQueryRequest {
    pub request: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplayQueryRequest {
    pub query: String,
}

fn outcome_response(outcome: QueryOutcome) -> Response {
    let status = outcome.error.as_ref().map(|e| status_for(e.kind())).unwrap_or(StatusCode::OK);
    (status, Json(outcome)).into_response()
}

pub async fn submit_query(State(state): State<AppState>, Json(body): Json<SubmitQueryRequest>) -> Response {
    if body.request.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "request must not be empty").into_response();
    }
    info!("Natural-language submission ({} chars)", body.request.len());
    outcome_response(state.orchestrator.submit(Submission::Natural(body.request)).await)
}

pub async fn replay_query(State(state): State<AppState>, Json(body): Json<ReplayQueryRequest>) -> Response {
    if body.query.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "query must not be empty").into_response();
    }
    outcome_response(state.orchestrator.submit(Submission::Replay(body.query)).await)
}

/// Outcome of the most recently initiated submission, if it has finished.
pub async fn latest_outcome(State(state): State<AppState>) -> Response {
    match state.orchestrator.latest_outcome() {
        Some(outcome) => Json(outcome.as_ref().clone()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
