//! Session connection state machine
//!
//! `connecting -> {online, offline}`, and back to `connecting` on any
//! reconnect. No state is terminal.
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::deadline::Deadline;
use crate::error::{ErrorKind, QueryError, QueryResult};
use crate::metrics;
use crate::utils::TextUtils;
use crate::workers::QueryExecutor;

pub const PROBE_QUERY: &str = "SELECT @@VERSION as version, DB_NAME() as current_db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Online { store_name: String, diagnostic: String },
    Offline { cause: ErrorKind, diagnostic: String },
}

impl SessionState {
    pub fn is_online(&self) -> bool {
        matches!(self, SessionState::Online { .. })
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    ProbeStarted,
    ProbeSucceeded { store_name: String, diagnostic: String },
    ProbeFailed(QueryError),
}

fn offline_diagnostic(error: &QueryError) -> String {
    match error {
        QueryError::Timeout(ms) => format!(
            "Connection timed out after {} ms. The server is not answering; check the firewall.",
            ms
        ),
        other => format!("Connection failed: {}", other),
    }
}

/// Pure transition function. Probe results only land while connecting.
pub fn transition(state: &SessionState, event: SessionEvent) -> SessionState {
    match (state, event) {
        (_, SessionEvent::ProbeStarted) => SessionState::Connecting,
        (SessionState::Connecting, SessionEvent::ProbeSucceeded { store_name, diagnostic }) => {
            SessionState::Online { store_name, diagnostic }
        }
        (SessionState::Connecting, SessionEvent::ProbeFailed(error)) => SessionState::Offline {
            cause: error.kind(),
            diagnostic: offline_diagnostic(&error),
        },
        (current, _) => current.clone(),
    }
}

/// Store name and diagnostic from a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    pub store_name: String,
    pub diagnostic: String,
}

pub struct SessionMonitor {
    state: ArcSwap<SessionState>,
    executor: Arc<dyn QueryExecutor>,
    probe_timeout: Duration,
    probe_lock: Mutex<()>,
}

impl SessionMonitor {
    pub fn new(executor: Arc<dyn QueryExecutor>, probe_timeout: Duration) -> Self {
        Self {
            state: ArcSwap::from_pointee(SessionState::Connecting),
            executor,
            probe_timeout,
            probe_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.load().as_ref().clone()
    }

    pub fn is_online(&self) -> bool {
        self.state.load().is_online()
    }

    fn apply(&self, event: SessionEvent) {
        self.state.rcu(|current| transition(current, event.clone()));
        metrics::set_session_online(self.is_online());
    }

    /// Probe the store and move to `online` or `offline`. Probes never overlap.
    pub async fn probe(&self) -> QueryResult<ProbeInfo> {
        let _guard = self.probe_lock.lock().await;
        self.apply(SessionEvent::ProbeStarted);
        info!("Probing relational store connectivity");

        let deadline = Deadline::after(self.probe_timeout);
        let outcome = self.executor.execute(PROBE_QUERY, &deadline).await.and_then(|rows| {
            let first = rows.first().ok_or_else(|| QueryError::Upstream {
                message: "No data returned from DB".to_string(),
                details: None,
                code: None,
            })?;
            let store_name = first
                .get("current_db")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .unwrap_or("Unknown")
                .to_string();
            let version = first.get("version").and_then(|v| v.as_str()).unwrap_or("");
            Ok(ProbeInfo {
                store_name,
                diagnostic: format!("Server: {}...", TextUtils::first_line(version, 30)),
            })
        });

        match &outcome {
            Ok(info) => {
                info!("Connected to {} ({})", info.store_name, info.diagnostic);
                self.apply(SessionEvent::ProbeSucceeded {
                    store_name: info.store_name.clone(),
                    diagnostic: info.diagnostic.clone(),
                });
            }
            Err(e) => {
                warn!("Connectivity probe failed: {}", e);
                self.apply(SessionEvent::ProbeFailed(e.clone()));
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::Row;
    use async_trait::async_trait;
    use serde_json::json;

    struct ProbeStub(QueryResult<Vec<Row>>);

    #[async_trait]
    impl QueryExecutor for ProbeStub {
        async fn execute(&self, query: &str, _deadline: &Deadline) -> QueryResult<Vec<Row>> {
            assert_eq!(query, PROBE_QUERY);
            self.0.clone()
        }
    }

    fn monitor(reply: QueryResult<Vec<Row>>) -> SessionMonitor {
        SessionMonitor::new(Arc::new(ProbeStub(reply)), Duration::from_secs(1))
    }

    #[test]
    fn test_results_only_land_while_connecting() {
        let online = SessionState::Online { store_name: "POS".into(), diagnostic: "ok".into() };
        let stale = transition(&online, SessionEvent::ProbeFailed(QueryError::Timeout(10)));
        assert_eq!(stale, online);
        assert_eq!(transition(&online, SessionEvent::ProbeStarted), SessionState::Connecting);
    }

    #[test]
    fn test_offline_distinguishes_timeout() {
        let timed_out = transition(&SessionState::Connecting, SessionEvent::ProbeFailed(QueryError::Timeout(15000)));
        let refused = transition(
            &SessionState::Connecting,
            SessionEvent::ProbeFailed(QueryError::Transport("connection refused".into())),
        );
        match (timed_out, refused) {
            (
                SessionState::Offline { cause: ErrorKind::Timeout, diagnostic: a },
                SessionState::Offline { cause: ErrorKind::Transport, diagnostic: b },
            ) => {
                assert!(a.contains("timed out"));
                assert!(b.contains("connection refused"));
            }
            other => panic!("unexpected states: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_successful_probe_goes_online() {
        let row = json!({
            "version": "Microsoft SQL Server 2019 (RTM) - 15.0.2000.5 (X64)\n\tSep 24 2019",
            "current_db": "WINPOS3"
        });
        let monitor = monitor(Ok(vec![row.as_object().unwrap().clone()]));
        assert_eq!(monitor.state(), SessionState::Connecting);

        let info = monitor.probe().await.unwrap();
        assert_eq!(info.store_name, "WINPOS3");
        assert_eq!(info.diagnostic, "Server: Microsoft SQL Server 2019 (RTM...");
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_empty_probe_result_is_offline() {
        let monitor = monitor(Ok(vec![]));
        let err = monitor.probe().await.unwrap_err();
        assert_eq!(err.to_string(), "No data returned from DB");
        assert!(matches!(monitor.state(), SessionState::Offline { cause: ErrorKind::Upstream, .. }));
    }

    #[tokio::test]
    async fn test_missing_store_name_is_unknown() {
        let row = json!({"version": "PostgreSQL 16", "current_db": null});
        let monitor = monitor(Ok(vec![row.as_object().unwrap().clone()]));
        assert_eq!(monitor.probe().await.unwrap().store_name, "Unknown");
    }
}
