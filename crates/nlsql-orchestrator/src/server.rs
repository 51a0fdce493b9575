//! HTTP server: wires the store, the orchestrator and the background tasks
//! together and serves the API until Ctrl-C.

use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    config::Config,
    context_engine::QueryOrchestrator,
    knowledge_db::KnowledgeDatabase,
    shared_state::AppState,
};

/// Open the configured store, falling back to an in-memory one.
pub fn open_store(cfg: &Config) -> anyhow::Result<Arc<KnowledgeDatabase>> {
    match KnowledgeDatabase::new(&cfg.database_path) {
        Ok(db) => {
            info!("Knowledge database initialized at: {}", cfg.database_path.display());
            Ok(Arc::new(db))
        }
        Err(e) => {
            warn!("Failed to initialize knowledge database: {}. Falling back to in-memory.", e);
            Ok(Arc::new(KnowledgeDatabase::new_in_memory().map_err(|e| anyhow::anyhow!("{}", e))?))
        }
    }
}

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::metrics::init_metrics();
    cfg.print_config();

    let store = open_store(&cfg)?;
    let orchestrator = Arc::new(QueryOrchestrator::from_config(&cfg, store));
    let state = AppState::new(orchestrator.clone(), cfg.clone());

    // Knowledge reconciliation and the first probe run while the API is already up.
    {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let report = orchestrator.startup().await;
            info!(
                "Startup finished: knowledge from {}, session {:?}",
                report.knowledge.source.as_str(),
                report.connection.session
            );
        });
    }

    let reconnect_task = cfg
        .reconnect_interval()
        .map(|interval| orchestrator.spawn_auto_reconnect(interval, state.shutdown.clone()));

    let addr = cfg.api_addr()?;
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = state.shutdown.clone();
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    if let Some(task) = reconnect_task {
        let _ = task.await;
    }
    Ok(())
}

pub fn build_router(state: AppState) -> axum::Router {
    use axum::{
        routing::{get, post, put},
        Router,
    };
    use std::time::Duration;
    use tower_http::{
        cors::{Any, CorsLayer},
        timeout::TimeoutLayer,
        trace::TraceLayer,
    };

    use crate::api;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::PUT, axum::http::Method::DELETE])
        .allow_headers(Any);

    // Generation, execution and summary each carry their own deadline; this is the outer bound.
    let request_timeout = Duration::from_secs(state.config.llm_timeout_seconds * 2)
        + Duration::from_millis(state.config.query_timeout_ms)
        + Duration::from_secs(5);

    Router::new()
        .route("/query", post(api::submit_query))
        .route("/query/replay", post(api::replay_query))
        .route("/query/latest", get(api::latest_outcome))
        .route("/session", get(api::get_session))
        .route("/session/reconnect", post(api::reconnect))
        .route("/knowledge", get(api::get_knowledge).put(api::save_knowledge))
        .route("/knowledge/reconcile", post(api::reconcile_knowledge))
        .route("/knowledge/reference", get(api::get_reference).put(api::set_reference))
        .route("/knowledge/sync", post(api::prepare_sync))
        .route("/schema", get(api::get_schema).put(api::save_schema))
        .route("/history", get(api::list_history).post(api::save_history))
        .route("/history/:id", put(api::update_history).delete(api::delete_history))
        .route("/backup", get(api::export_backup).post(api::import_backup))
        .route("/stats", get(api::get_stats))
        .route("/metrics", get(api::get_metrics))
        .route("/healthz", get(|| async { "OK" }))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
