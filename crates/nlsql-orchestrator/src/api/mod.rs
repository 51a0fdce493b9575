//! API module - HTTP surface over the query orchestrator

pub mod backup_api;
pub mod history_api;
pub mod knowledge_api;
pub mod query_api;
pub mod session_api;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::{ErrorKind, ErrorReport, QueryError};

pub use backup_api::{export_backup, import_backup};
pub use history_api::{delete_history, list_history, save_history, update_history};
pub use knowledge_api::{
    get_knowledge, get_reference, get_schema, prepare_sync, reconcile_knowledge, save_knowledge, save_schema,
    set_reference,
};
pub use query_api::{latest_outcome, replay_query, submit_query};
pub use session_api::{get_session, get_stats, reconnect};

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Upstream | ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::GenerationUnavailable | ErrorKind::Generation => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::InvalidBackupFormat => StatusCode::BAD_REQUEST,
        ErrorKind::Superseded => StatusCode::CONFLICT,
    }
}

/// Failure body `{error, kind, message, code?}` with a status per failure class.
pub struct ApiError(pub QueryError);

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        (status, Json(ErrorReport::from(&self.0))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn get_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        crate::metrics::render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_per_failure_class() {
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::Transport), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::GenerationUnavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::InvalidBackupFormat), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Superseded), StatusCode::CONFLICT);

        let response = ApiError(QueryError::Storage("disk full".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
