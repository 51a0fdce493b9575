//! State shared by every request handler and background task

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{config::Config, context_engine::QueryOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<QueryOrchestrator>,
    /// Read-only after startup.
    pub config: Arc<Config>,
    /// Fired once on shutdown; background tasks watch it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(orchestrator: Arc<QueryOrchestrator>, config: Config) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }
}
