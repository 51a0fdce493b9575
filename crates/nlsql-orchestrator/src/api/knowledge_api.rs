//! Knowledge, remote reference and schema cache endpoints

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::ApiResult;
use crate::context_engine::{Reconciliation, RemoteSync};
use crate::shared_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct TextBody {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReferenceBody {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub url: String,
    pub text: String,
}

pub async fn get_knowledge(State(state): State<AppState>) -> ApiResult<TextBody> {
    Ok(Json(TextBody { text: state.orchestrator.knowledge()? }))
}

pub async fn save_knowledge(State(state): State<AppState>, Json(body): Json<TextBody>) -> ApiResult<TextBody> {
    state.orchestrator.save_knowledge(&body.text)?;
    Ok(Json(body))
}

pub async fn reconcile_knowledge(State(state): State<AppState>) -> Json<Reconciliation> {
    Json(state.orchestrator.reconcile_knowledge().await)
}

pub async fn get_reference(State(state): State<AppState>) -> Json<ReferenceBody> {
    Json(ReferenceBody { url: state.orchestrator.knowledge_reference() })
}

pub async fn set_reference(State(state): State<AppState>, Json(body): Json<ReferenceBody>) -> ApiResult<ReferenceBody> {
    state.orchestrator.set_knowledge_reference(&body.url)?;
    info!("Knowledge reference set to {}", body.url);
    Ok(Json(body))
}

pub async fn prepare_sync(State(state): State<AppState>, Json(body): Json<SyncRequest>) -> ApiResult<RemoteSync> {
    Ok(Json(state.orchestrator.prepare_remote_sync(&body.url, &body.text)?))
}

pub async fn get_schema(State(state): State<AppState>) -> ApiResult<TextBody> {
    Ok(Json(TextBody { text: state.orchestrator.schema()? }))
}

pub async fn save_schema(State(state): State<AppState>, Json(body): Json<TextBody>) -> ApiResult<TextBody> {
    state.orchestrator.save_schema(&body.text)?;
    Ok(Json(body))
}
