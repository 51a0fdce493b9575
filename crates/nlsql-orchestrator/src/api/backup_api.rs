//! Backup export and import

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use crate::api::ApiError;
use crate::shared_state::AppState;

pub async fn export_backup(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let json = state.orchestrator.export_backup()?;
    Ok((
        StatusCode::OK,
        [
            ("content-type", "application/json"),
            ("content-disposition", "attachment; filename=\"knowledge-backup.json\""),
        ],
        json,
    ))
}

/// Raw body so malformed documents reach the store's validation and map to `InvalidBackupFormat`.
pub async fn import_backup(State(state): State<AppState>, body: String) -> Result<StatusCode, ApiError> {
    state.orchestrator.import_backup(&body)?;
    info!("Backup imported ({} bytes)", body.len());
    Ok(StatusCode::NO_CONTENT)
}
