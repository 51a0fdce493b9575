use crate::config::Config;
use crate::context_engine::{
    analyzer::ResultAnalyzer,
    context_builder::{ContextBuilder, ContextBuilderConfig},
    generator::{GeneratorConfig, QueryGenerator},
    reconciler::{self, KnowledgeReconciler, Reconciliation, RemoteSync},
    schema_learner,
};
use crate::deadline::Deadline;
use crate::error::{ErrorReport, QueryError, QueryResult};
use crate::knowledge_db::{Bucket, DatabaseStats, HistoryEntry, KnowledgeDatabase};
use crate::metrics;
use crate::session::{ProbeInfo, SessionMonitor, SessionState};
use crate::time_context::TimeContext;
use crate::workers::{CompletionBackend, LLMWorker, QueryExecutor, QueryWorker, Row};
use arc_swap::ArcSwapOption;
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Orchestrates context building, generation, execution and analysis
pub struct QueryOrchestrator {
    store: Arc<KnowledgeDatabase>,
    executor: Arc<dyn QueryExecutor>,
    session: SessionMonitor,
    reconciler: KnowledgeReconciler,
    context_builder: ContextBuilder,
    generator: QueryGenerator,
    analyzer: ResultAnalyzer,
    config: OrchestratorConfig,
    submissions: AtomicU64,
    current_token: Mutex<CancellationToken>,
    latest_outcome: ArcSwapOption<QueryOutcome>,
    learn_lock: tokio::sync::Mutex<()>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub query_timeout: Duration,
    pub probe_timeout: Duration,
    pub llm_timeout: Duration,
    pub knowledge_fetch_timeout: Duration,
    pub timezone: Tz,
    pub sql_dialect: String,
    pub partition_table_prefix: String,
    pub max_context_chars: usize,
    pub analysis_preview_rows: usize,
    pub default_knowledge_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            query_timeout: config.query_timeout(),
            probe_timeout: config.probe_timeout(),
            llm_timeout: config.llm_timeout(),
            knowledge_fetch_timeout: config.probe_timeout(),
            timezone: config.target_timezone,
            sql_dialect: config.sql_dialect.clone(),
            partition_table_prefix: config.partition_table_prefix.clone(),
            max_context_chars: config.max_context_chars,
            analysis_preview_rows: config.analysis_preview_rows,
            default_knowledge_url: config.default_knowledge_url.clone(),
        }
    }
}

/// A natural-language request or a saved query to run as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Natural(String),
    Replay(String),
}

impl Submission {
    fn is_natural(&self) -> bool {
        matches!(self, Submission::Natural(_))
    }
}

/// Result of one submission. `failure` is set when any stage failed;
/// `query` still carries the text that was (or would have been) executed.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub submission_id: u64,
    pub query: String,
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ErrorReport>,
    #[serde(skip)]
    pub error: Option<QueryError>,
}

impl QueryOutcome {
    fn failed(submission_id: u64, query: String, error: QueryError) -> Self {
        Self {
            submission_id,
            query,
            rows: Vec::new(),
            summary: None,
            failure: Some(ErrorReport::from(&error)),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Session state after a (re)connect, plus the learner failure if any.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectReport {
    pub session: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_error: Option<ErrorReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub knowledge: Reconciliation,
    pub connection: ConnectReport,
}

impl QueryOrchestrator {
    pub fn new(
        store: Arc<KnowledgeDatabase>,
        executor: Arc<dyn QueryExecutor>,
        backend: Arc<dyn CompletionBackend>,
        config: OrchestratorConfig,
    ) -> Self {
        let session = SessionMonitor::new(executor.clone(), config.probe_timeout);
        let reconciler = KnowledgeReconciler::new(
            store.clone(),
            config.default_knowledge_url.clone(),
            config.knowledge_fetch_timeout,
        );
        let context_builder = ContextBuilder::new(ContextBuilderConfig {
            max_total_chars: config.max_context_chars,
            partition_table_prefix: config.partition_table_prefix.clone(),
        });
        let generator = QueryGenerator::new(
            backend.clone(),
            GeneratorConfig { dialect: config.sql_dialect.clone(), ..Default::default() },
        );
        let analyzer = ResultAnalyzer::new(backend, config.analysis_preview_rows);

        info!("Query orchestrator initialized");
        Self {
            store,
            executor,
            session,
            reconciler,
            context_builder,
            generator,
            analyzer,
            config,
            submissions: AtomicU64::new(0),
            current_token: Mutex::new(CancellationToken::new()),
            latest_outcome: ArcSwapOption::empty(),
            learn_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Wire the HTTP proxy client and the language-model client from configuration.
    pub fn from_config(config: &Config, store: Arc<KnowledgeDatabase>) -> Self {
        let executor: Arc<dyn QueryExecutor> = Arc::new(QueryWorker::new(config.proxy_url.clone()));
        let backend: Arc<dyn CompletionBackend> = Arc::new(LLMWorker::from_config(config));
        Self::new(store, executor, backend, OrchestratorConfig::from_config(config))
    }

    pub fn store(&self) -> &Arc<KnowledgeDatabase> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Reconcile knowledge and probe the store concurrently.
    pub async fn startup(&self) -> StartupReport {
        let (knowledge, connection) = tokio::join!(self.reconciler.reconcile(), self.connect());
        StartupReport { knowledge, connection }
    }

    // ----- session -----

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Probe, then learn the schema when online. Learner failures are reported, not raised.
    pub async fn connect(&self) -> ConnectReport {
        let schema_error = match self.session.probe().await {
            Ok(ProbeInfo { store_name, .. }) => {
                debug!("Learning schema of {}", store_name);
                self.refresh_schema().await.err().map(|e| ErrorReport::from(&e))
            }
            Err(_) => None,
        };
        ConnectReport { session: self.session.state(), schema_error }
    }

    /// Re-run introspection and replace the cached descriptor. The cache is
    /// left untouched on failure. Overlapping refreshes run one after another,
    /// so the last one started is the last one written.
    pub async fn refresh_schema(&self) -> QueryResult<String> {
        let _guard = self.learn_lock.lock().await;
        if !self.session.is_online() {
            return Err(QueryError::Transport("session is not online".to_string()));
        }
        let deadline = Deadline::after(self.config.query_timeout);
        let descriptor = schema_learner::learn(self.executor.as_ref(), &deadline).await?;
        self.store.put(Bucket::Schema, &descriptor)?;
        Ok(descriptor)
    }

    /// Re-probe every `interval` while offline, until `shutdown` fires.
    pub fn spawn_auto_reconnect(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Auto-reconnect stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if matches!(this.session.state(), SessionState::Offline { .. }) {
                            info!("Session offline; retrying connection");
                            this.connect().await;
                        }
                    }
                }
            }
        })
    }

    // ----- submissions -----

    /// Cancel whatever is in flight and hand out the next submission id.
    fn begin_submission(&self) -> (u64, CancellationToken) {
        let token = CancellationToken::new();
        let mut current = self.current_token.lock().unwrap_or_else(|e| e.into_inner());
        current.cancel();
        *current = token.clone();
        let id = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        (id, token)
    }

    fn read_bucket(&self, bucket: Bucket) -> QueryResult<String> {
        self.store.get(bucket).map(Option::unwrap_or_default).map_err(|e| {
            warn!("Could not read {} for context: {}", bucket.key(), e);
            e
        })
    }

    /// Run one submission through generate → execute → analyze.
    /// A newer submission cancels this one, which then reports `Superseded`.
    pub async fn submit(&self, submission: Submission) -> QueryOutcome {
        let (id, token) = self.begin_submission();
        let outcome = self.run_pipeline(id, &submission, &token).await;

        let label = match &outcome.error {
            None => "success",
            Some(e) => e.kind().as_str(),
        };
        metrics::inc_query(label);
        self.record_outcome(&outcome);
        outcome
    }

    async fn run_pipeline(&self, id: u64, submission: &Submission, token: &CancellationToken) -> QueryOutcome {
        let query = match submission {
            Submission::Replay(query) => query.trim().to_string(),
            Submission::Natural(request) => {
                // Context is re-read from the store on every generation.
                let context = self
                    .read_bucket(Bucket::Schema)
                    .and_then(|schema| Ok((schema, self.read_bucket(Bucket::Knowledge)?)));
                let (schema, knowledge) = match context {
                    Ok(context) => context,
                    Err(error) => return QueryOutcome::failed(id, String::new(), error),
                };
                let bundle = self.context_builder.build(
                    request,
                    &schema,
                    &knowledge,
                    &TimeContext::now(self.config.timezone),
                );
                let deadline = Deadline::with_token(self.config.llm_timeout, token.clone());
                let generated = self
                    .generator
                    .generate(request, &bundle, &self.config.partition_table_prefix, &deadline)
                    .await;
                match generated.failure {
                    Some(error) => {
                        metrics::inc_generation(error.kind().as_str());
                        return QueryOutcome::failed(id, generated.query, error);
                    }
                    None => {
                        metrics::inc_generation("success");
                        generated.query
                    }
                }
            }
        };

        let deadline = Deadline::with_token(self.config.query_timeout, token.clone());
        let rows = match self.executor.execute(&query, &deadline).await {
            Ok(rows) => rows,
            Err(error) => return QueryOutcome::failed(id, query, error),
        };

        let summary = if submission.is_natural() {
            let deadline = Deadline::with_token(self.config.llm_timeout, token.clone());
            self.analyzer.summarize(&rows, &deadline).await
        } else {
            None
        };
        if token.is_cancelled() {
            return QueryOutcome::failed(id, query, QueryError::Superseded);
        }

        info!("Submission {} returned {} rows", id, rows.len());
        QueryOutcome { submission_id: id, query, rows, summary, failure: None, error: None }
    }

    /// Keep only the outcome of the most recently initiated submission.
    fn record_outcome(&self, outcome: &QueryOutcome) {
        if outcome.submission_id != self.submissions.load(Ordering::SeqCst) {
            debug!("Discarding stale outcome of submission {}", outcome.submission_id);
            return;
        }
        let fresh = Arc::new(outcome.clone());
        self.latest_outcome.rcu(|current| match current {
            Some(existing) if existing.submission_id > fresh.submission_id => Some(Arc::clone(existing)),
            _ => Some(Arc::clone(&fresh)),
        });
    }

    pub fn latest_outcome(&self) -> Option<Arc<QueryOutcome>> {
        self.latest_outcome.load_full()
    }

    // ----- knowledge and schema -----

    pub async fn reconcile_knowledge(&self) -> Reconciliation {
        self.reconciler.reconcile().await
    }

    pub fn knowledge(&self) -> QueryResult<String> {
        Ok(self.store.get(Bucket::Knowledge)?.unwrap_or_default())
    }

    pub fn save_knowledge(&self, text: &str) -> QueryResult<()> {
        self.store.put(Bucket::Knowledge, text)?;
        info!("Knowledge saved ({} chars)", text.len());
        Ok(())
    }

    pub fn schema(&self) -> QueryResult<String> {
        Ok(self.store.get(Bucket::Schema)?.unwrap_or_default())
    }

    /// Manual edit of the cached descriptor; replaced again by the next successful introspection.
    pub fn save_schema(&self, text: &str) -> QueryResult<()> {
        self.store.put(Bucket::Schema, text)
    }

    pub fn knowledge_reference(&self) -> String {
        self.reconciler.reference()
    }

    pub fn set_knowledge_reference(&self, reference: &str) -> QueryResult<()> {
        self.store.put(Bucket::RemoteReference, reference.trim())
    }

    /// Persist reference and text, then hand back the web-edit address for a manual commit.
    pub fn prepare_remote_sync(&self, reference: &str, text: &str) -> QueryResult<RemoteSync> {
        self.set_knowledge_reference(reference)?;
        self.save_knowledge(text)?;
        let edit_url = reconciler::edit_url(reference);
        if edit_url.is_none() {
            warn!("No edit address for knowledge reference {}", reference);
        }
        Ok(RemoteSync { edit_url, text: text.to_string() })
    }

    // ----- history, backup, stats -----

    pub fn history(&self) -> QueryResult<Vec<HistoryEntry>> {
        self.store.history.list()
    }

    pub fn save_history(&self, name: &str, query: &str) -> QueryResult<HistoryEntry> {
        self.store.history.append(name, query)
    }

    pub fn update_history(&self, id: i64, name: &str, query: &str) -> QueryResult<HistoryEntry> {
        self.store.history.update(id, name, query)
    }

    pub fn delete_history(&self, id: i64) -> QueryResult<bool> {
        self.store.history.delete(id)
    }

    pub fn export_backup(&self) -> QueryResult<String> {
        self.store.export_json()
    }

    pub fn import_backup(&self, json: &str) -> QueryResult<()> {
        self.store.import_json(json)
    }

    pub fn stats(&self) -> QueryResult<DatabaseStats> {
        self.store.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_engine::analyzer::NO_DATA_MESSAGE;
    use crate::context_engine::generator::UNCONFIGURED_PLACEHOLDER;
    use crate::deadline::Interrupted;
    use crate::error::ErrorKind;
    use crate::session::PROBE_QUERY;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().unwrap().clone()
    }

    /// Scripted proxy: probe, introspection, and everything else.
    struct ScriptedProxy {
        schema_rows: QueryResult<Vec<Row>>,
        data_rows: Vec<Row>,
        slow_marker: Option<&'static str>,
        executed: Mutex<Vec<String>>,
    }

    impl ScriptedProxy {
        fn new(data_rows: Vec<Row>) -> Self {
            Self {
                schema_rows: Ok(vec![row(json!({
                    "TABLE_NAME": "parts", "COLUMN_NAME": "barcode", "DATA_TYPE": "varchar", "IS_PRIMARY_KEY": "YES"
                }))]),
                data_rows,
                slow_marker: None,
                executed: Mutex::new(Vec::new()),
            }
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueryExecutor for ScriptedProxy {
        async fn execute(&self, query: &str, deadline: &Deadline) -> QueryResult<Vec<Row>> {
            self.executed.lock().unwrap().push(query.to_string());
            if query == PROBE_QUERY {
                return Ok(vec![row(json!({"version": "Microsoft SQL Server 2019", "current_db": "WINPOS3"}))]);
            }
            if query.contains("INFORMATION_SCHEMA") {
                return self.schema_rows.clone();
            }
            if self.slow_marker.is_some_and(|m| query.contains(m)) {
                return match deadline.run(tokio::time::sleep(Duration::from_secs(30))).await {
                    Err(Interrupted::Cancelled) => Err(QueryError::Superseded),
                    Err(Interrupted::Expired) => Err(QueryError::Timeout(deadline.budget_ms())),
                    Ok(()) => Ok(Vec::new()),
                };
            }
            Ok(self.data_rows.clone())
        }
    }

    /// Echoes the request line back as a query; summaries are fixed.
    struct EchoModel {
        configured: bool,
        prompts: Mutex<Vec<String>>,
    }

    impl EchoModel {
        fn new(configured: bool) -> Self {
            Self { configured, prompts: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl CompletionBackend for EchoModel {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn complete(&self, _system: &str, prompt: &str, _temperature: f32) -> QueryResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.starts_with("Analyze") {
                return Ok("재고가 있습니다.".to_string());
            }
            let request = prompt.rsplit("Request: ").next().unwrap_or_default();
            Ok(format!("```sql\nSELECT '{}' AS request\n```", request))
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            query_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            llm_timeout: Duration::from_secs(5),
            knowledge_fetch_timeout: Duration::from_secs(5),
            default_knowledge_url: "::offline::".to_string(),
            ..Default::default()
        }
    }

    fn orchestrator(proxy: Arc<ScriptedProxy>, model: Arc<EchoModel>) -> QueryOrchestrator {
        let store = Arc::new(KnowledgeDatabase::new_in_memory().unwrap());
        QueryOrchestrator::new(store, proxy, model, config())
    }

    #[tokio::test]
    async fn test_natural_submission_runs_the_full_pipeline() {
        let proxy = Arc::new(ScriptedProxy::new(vec![row(json!({"descr": "콜라", "curjago": 12}))]));
        let model = Arc::new(EchoModel::new(true));
        let orch = orchestrator(proxy.clone(), model.clone());
        orch.save_knowledge("curjago is current stock").unwrap();
        orch.connect().await;

        let outcome = orch.submit(Submission::Natural("콜라 재고".into())).await;
        assert!(outcome.is_success(), "{:?}", outcome.failure);
        assert_eq!(outcome.query, "SELECT '콜라 재고' AS request");
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.summary.as_deref(), Some("재고가 있습니다."));

        let prompts = model.prompts.lock().unwrap().clone();
        assert!(prompts[0].contains("Table 'parts': barcode (varchar) [PK]"));
        assert!(prompts[0].contains("curjago is current stock"));
        assert!(proxy.executed().contains(&"SELECT '콜라 재고' AS request".to_string()));
        assert_eq!(orch.latest_outcome().unwrap().submission_id, outcome.submission_id);
    }

    #[tokio::test]
    async fn test_replay_skips_generation_and_summary() {
        let proxy = Arc::new(ScriptedProxy::new(vec![row(json!({"one": 1}))]));
        let model = Arc::new(EchoModel::new(true));
        let orch = orchestrator(proxy.clone(), model.clone());

        let outcome = orch.submit(Submission::Replay("  SELECT 1 AS one ".into())).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.query, "SELECT 1 AS one");
        assert_eq!(outcome.summary, None);
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_result_gets_no_data_summary() {
        let proxy = Arc::new(ScriptedProxy::new(Vec::new()));
        let orch = orchestrator(proxy, Arc::new(EchoModel::new(true)));
        let outcome = orch.submit(Submission::Natural("어제 반품".into())).await;
        assert_eq!(outcome.summary.as_deref(), Some(NO_DATA_MESSAGE));
    }

    #[tokio::test]
    async fn test_missing_credential_stops_before_execution() {
        let proxy = Arc::new(ScriptedProxy::new(Vec::new()));
        let orch = orchestrator(proxy.clone(), Arc::new(EchoModel::new(false)));

        let outcome = orch.submit(Submission::Natural("오늘 매출".into())).await;
        assert_eq!(outcome.query, UNCONFIGURED_PLACEHOLDER);
        assert_eq!(outcome.error, Some(QueryError::GenerationUnavailable));
        assert!(proxy.executed().is_empty());
    }

    #[tokio::test]
    async fn test_newer_submission_supersedes_pending_one() {
        let mut proxy = ScriptedProxy::new(vec![row(json!({"n": 2}))]);
        proxy.slow_marker = Some("SLOW");
        let orch = Arc::new(orchestrator(Arc::new(proxy), Arc::new(EchoModel::new(true))));

        let first = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.submit(Submission::Replay("SELECT 'SLOW'".into())).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = orch.submit(Submission::Replay("SELECT 2 AS n".into())).await;
        let first = first.await.unwrap();

        assert_eq!(first.error, Some(QueryError::Superseded));
        assert!(second.is_success());
        assert!(second.submission_id > first.submission_id);
        assert_eq!(orch.latest_outcome().unwrap().submission_id, second.submission_id);
    }

    #[tokio::test]
    async fn test_failed_introspection_keeps_cached_schema() {
        let mut proxy = ScriptedProxy::new(Vec::new());
        proxy.schema_rows = Err(QueryError::Upstream {
            message: "permission denied".into(),
            details: None,
            code: Some("EPERM".into()),
        });
        let orch = orchestrator(Arc::new(proxy), Arc::new(EchoModel::new(true)));
        orch.save_schema("Table 'parts': barcode (varchar) [PK]\n").unwrap();

        let report = orch.connect().await;
        assert!(report.session.is_online());
        assert_eq!(report.schema_error.unwrap().code.as_deref(), Some("EPERM"));
        assert_eq!(orch.schema().unwrap(), "Table 'parts': barcode (varchar) [PK]\n");
    }

    #[tokio::test]
    async fn test_learner_is_gated_on_online() {
        let orch = orchestrator(Arc::new(ScriptedProxy::new(Vec::new())), Arc::new(EchoModel::new(true)));
        let err = orch.refresh_schema().await.unwrap_err();
        assert!(matches!(err, QueryError::Transport(_)));
    }

    #[tokio::test]
    async fn test_remote_sync_persists_and_returns_edit_address() {
        let orch = orchestrator(Arc::new(ScriptedProxy::new(Vec::new())), Arc::new(EchoModel::new(true)));
        let sync = orch
            .prepare_remote_sync("https://github.com/acme/pos/blob/main/rules.txt", "new rules")
            .unwrap();
        assert_eq!(sync.edit_url.as_deref(), Some("https://github.com/acme/pos/edit/main/rules.txt"));
        assert_eq!(orch.knowledge().unwrap(), "new rules");
        assert_eq!(orch.knowledge_reference(), "https://github.com/acme/pos/blob/main/rules.txt");
    }

    #[tokio::test]
    async fn test_startup_seeds_knowledge_without_remote() {
        let orch = orchestrator(Arc::new(ScriptedProxy::new(Vec::new())), Arc::new(EchoModel::new(true)));
        let report = orch.startup().await;
        assert_eq!(report.knowledge.source, reconciler::KnowledgeSource::Seed);
        assert!(report.connection.session.is_online());
        assert_eq!(orch.knowledge().unwrap(), reconciler::DEFAULT_KNOWLEDGE);
    }

    #[tokio::test]
    async fn test_unreadable_store_fails_the_submission() {
        let proxy = Arc::new(ScriptedProxy::new(vec![row(json!({"n": 1}))]));
        let model = Arc::new(EchoModel::new(true));
        let orch = orchestrator(proxy.clone(), model.clone());
        orch.save_knowledge("tmamoney1 is the net sale amount").unwrap();
        orch.store().execute_batch("DROP TABLE buckets").unwrap();

        let outcome = orch.submit(Submission::Natural("오늘 매출".into())).await;
        let error = outcome.error.clone().unwrap();
        assert_eq!(error.kind(), ErrorKind::Storage);
        assert_eq!(outcome.failure.unwrap().kind, ErrorKind::Storage);
        assert!(outcome.query.is_empty());
        assert!(model.prompts.lock().unwrap().is_empty());
        assert!(proxy.executed().is_empty());
    }

    /// Probe fails until `failures` is used up; introspection returns no rows.
    struct FlakyProbe {
        failures: AtomicUsize,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl QueryExecutor for FlakyProbe {
        async fn execute(&self, query: &str, _deadline: &Deadline) -> QueryResult<Vec<Row>> {
            if query != PROBE_QUERY {
                return Ok(Vec::new());
            }
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(QueryError::Transport("down".into()));
            }
            Ok(vec![row(json!({"version": "v16", "current_db": "WINPOS3"}))])
        }
    }

    #[tokio::test]
    async fn test_auto_reconnect_recovers_and_stops_on_shutdown() {
        let proxy = Arc::new(FlakyProbe { failures: AtomicUsize::new(1), probes: AtomicUsize::new(0) });
        let store = Arc::new(KnowledgeDatabase::new_in_memory().unwrap());
        let orch = Arc::new(QueryOrchestrator::new(store, proxy.clone(), Arc::new(EchoModel::new(true)), config()));

        let first = orch.connect().await;
        assert!(matches!(first.session, SessionState::Offline { cause: ErrorKind::Transport, .. }));

        let shutdown = CancellationToken::new();
        let handle = orch.spawn_auto_reconnect(Duration::from_millis(30), shutdown.clone());
        tokio::time::timeout(Duration::from_secs(2), async {
            while !orch.session_state().is_online() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session never came back online");
        assert_eq!(
            orch.session_state(),
            SessionState::Online { store_name: "WINPOS3".into(), diagnostic: "Server: v16...".into() }
        );

        // online sessions are left alone
        let probes = proxy.probes.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(proxy.probes.load(Ordering::SeqCst), probes);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    /// Introspection answers in call order: boot (during connect), then a slow stale reply, then a fresh one.
    struct ReorderingIntrospection {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryExecutor for ReorderingIntrospection {
        async fn execute(&self, query: &str, _deadline: &Deadline) -> QueryResult<Vec<Row>> {
            if query == PROBE_QUERY {
                return Ok(vec![row(json!({"version": "v16", "current_db": "WINPOS3"}))]);
            }
            let table = match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => "boot",
                1 => {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    "stale"
                }
                _ => "fresh",
            };
            Ok(vec![row(json!({
                "TABLE_NAME": table, "COLUMN_NAME": "id", "DATA_TYPE": "int", "IS_PRIMARY_KEY": "YES"
            }))])
        }
    }

    #[tokio::test]
    async fn test_overlapping_refreshes_keep_the_latest_schema() {
        let proxy = Arc::new(ReorderingIntrospection { calls: AtomicUsize::new(0) });
        let store = Arc::new(KnowledgeDatabase::new_in_memory().unwrap());
        let orch = Arc::new(QueryOrchestrator::new(store, proxy, Arc::new(EchoModel::new(true)), config()));
        orch.connect().await;
        assert!(orch.schema().unwrap().contains("'boot'"));

        let older = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.refresh_schema().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let newer = orch.refresh_schema().await.unwrap();
        older.await.unwrap().unwrap();

        assert!(newer.contains("'fresh'"));
        assert_eq!(orch.schema().unwrap(), newer);
    }
}
