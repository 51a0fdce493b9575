//! Query execution gateway
//!
//! Posts query text to the backend proxy (`{ query }` in, `{ data: [...] }` or
//! `{ error, details?, code? }` out) under a cancellable deadline.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::deadline::{Deadline, Interrupted};
use crate::error::{QueryError, QueryResult};

/// One result row as returned by the proxy, column name to value.
pub type Row = Map<String, Value>;

/// Execution seam used by the orchestrator, the schema learner and the session probe.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str, deadline: &Deadline) -> QueryResult<Vec<Row>>;
}

#[derive(Debug, Serialize)]
struct ProxyRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProxySuccess {
    #[serde(default)]
    data: Option<Vec<Row>>,
}

#[derive(Debug, Default, Deserialize)]
struct ProxyFailure {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

pub struct QueryWorker {
    proxy_url: String,
    http_client: reqwest::Client,
}

impl QueryWorker {
    pub fn new(proxy_url: String) -> Self {
        info!("Query worker initialized with proxy: {}", proxy_url);
        Self {
            proxy_url,
            http_client: reqwest::Client::new(),
        }
    }

    async fn round_trip(&self, query: &str) -> QueryResult<Vec<Row>> {
        let response = self.http_client
            .post(&self.proxy_url)
            .json(&ProxyRequest { query })
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| QueryError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(parse_failure(status, &body));
        }

        let parsed: ProxySuccess = serde_json::from_str(&body).map_err(|e| QueryError::Upstream {
            message: "Malformed proxy response".to_string(),
            details: Some(e.to_string()),
            code: None,
        })?;
        Ok(parsed.data.unwrap_or_default())
    }
}

fn code_to_string(code: Value) -> Option<String> {
    match code {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn parse_failure(status: reqwest::StatusCode, body: &str) -> QueryError {
    let failure: ProxyFailure = serde_json::from_str(body).unwrap_or_default();
    let fallback = format!("Server responded with {}", status.as_u16());
    let details = failure.details.or_else(|| {
        let trimmed = body.trim();
        (!trimmed.is_empty() && !trimmed.starts_with('{')).then(|| trimmed.chars().take(500).collect())
    });
    QueryError::Upstream {
        message: failure.error.unwrap_or(fallback),
        details,
        code: failure.code.and_then(code_to_string),
    }
}

#[async_trait]
impl QueryExecutor for QueryWorker {
    async fn execute(&self, query: &str, deadline: &Deadline) -> QueryResult<Vec<Row>> {
        debug!("Executing query ({} chars, budget {} ms)", query.len(), deadline.budget_ms());
        match deadline.run(self.round_trip(query)).await {
            Ok(Ok(rows)) => {
                debug!("Proxy returned {} rows", rows.len());
                Ok(rows)
            }
            Ok(Err(e)) => {
                warn!("Query failed: {}", e);
                Err(e)
            }
            Err(Interrupted::Expired) => {
                warn!("Query aborted after {} ms", deadline.budget_ms());
                Err(QueryError::Timeout(deadline.budget_ms()))
            }
            Err(Interrupted::Cancelled) => {
                debug!("Query cancelled by a newer submission");
                Err(QueryError::Superseded)
            }
        }
    }
}
