//! Remote knowledge reconciliation
//!
//! The hosted knowledge file is the source of truth when reachable. Otherwise
//! the last locally persisted snapshot is used, and on a first run with
//! neither, the built-in seed. `reconcile` never fails.
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::knowledge_db::{Bucket, KnowledgeDatabase};
use crate::metrics;
use crate::workers::timed_http_client;

/// Built-in knowledge used when nothing else is available.
pub const DEFAULT_KNOWLEDGE: &str = include_str!("default_knowledge.txt");

const RAW_HOST: &str = "raw.githubusercontent.com";
const REPO_HOST: &str = "github.com";
const TOKEN_PARAM: &str = "token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeSource {
    Remote,
    Local,
    Seed,
}

impl KnowledgeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeSource::Remote => "remote",
            KnowledgeSource::Local => "local",
            KnowledgeSource::Seed => "seed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub text: String,
    pub source: KnowledgeSource,
}

/// What the user needs to push local knowledge back to the hosted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteSync {
    pub edit_url: Option<String>,
    pub text: String,
}

/// Drop any `token` query parameter.
fn strip_token(url: &mut Url) {
    if url.query().is_none() {
        return;
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != TOKEN_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}

/// Turn a reference into a directly fetchable raw-content address.
/// Repository file views are rewritten to the raw host; tokens never leave this function.
pub fn normalize_reference(reference: &str) -> Option<Url> {
    let mut url = Url::parse(reference.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();

    if host == REPO_HOST || host == format!("www.{}", REPO_HOST) {
        let path = url.path().replacen("/blob/", "/", 1);
        url.set_host(Some(RAW_HOST)).ok()?;
        url.set_path(&path);
    }
    strip_token(&mut url);
    Some(url)
}

/// Web-edit address for a repository file view; raw addresses have none.
pub fn edit_url(reference: &str) -> Option<String> {
    let mut url = Url::parse(reference.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if host != REPO_HOST && host != format!("www.{}", REPO_HOST) {
        return None;
    }
    if !url.path().contains("/blob/") {
        return None;
    }
    let path = url.path().replacen("/blob/", "/edit/", 1);
    url.set_path(&path);
    Some(url.to_string())
}

pub struct KnowledgeReconciler {
    store: Arc<KnowledgeDatabase>,
    http_client: reqwest::Client,
    default_reference: String,
}

impl KnowledgeReconciler {
    pub fn new(store: Arc<KnowledgeDatabase>, default_reference: String, fetch_timeout: Duration) -> Self {
        Self {
            store,
            http_client: timed_http_client(fetch_timeout),
            default_reference,
        }
    }

    /// Stored reference, assigning and persisting the default on first run.
    pub fn reference(&self) -> String {
        match self.store.get(Bucket::RemoteReference) {
            Ok(Some(reference)) => reference,
            Ok(None) => {
                info!("No knowledge reference configured; using default {}", self.default_reference);
                if let Err(e) = self.store.put(Bucket::RemoteReference, &self.default_reference) {
                    warn!("Could not persist default knowledge reference: {}", e);
                }
                self.default_reference.clone()
            }
            Err(e) => {
                warn!("Could not read knowledge reference: {}", e);
                self.default_reference.clone()
            }
        }
    }

    async fn fetch(&self, url: Url) -> Option<String> {
        debug!("Fetching knowledge from {}", url);
        let response = self
            .http_client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("Failed to read knowledge body: {}", e);
                    None
                }
            },
            Ok(resp) => {
                warn!("Knowledge fetch returned {}, falling back to local store", resp.status());
                None
            }
            Err(e) => {
                warn!("Knowledge fetch failed, falling back to local store: {}", e);
                None
            }
        }
    }

    pub async fn reconcile(&self) -> Reconciliation {
        let reference = self.reference();
        let outcome = self.reconcile_from(&reference).await;
        metrics::inc_reconcile(outcome.source.as_str());
        info!("Knowledge loaded from {} source ({} chars)", outcome.source.as_str(), outcome.text.len());
        outcome
    }

    async fn reconcile_from(&self, reference: &str) -> Reconciliation {
        match normalize_reference(reference) {
            Some(url) => {
                if let Some(text) = self.fetch(url).await {
                    if let Err(e) = self.store.put(Bucket::Knowledge, &text) {
                        warn!("Fetched knowledge could not be persisted: {}", e);
                    }
                    return Reconciliation { text, source: KnowledgeSource::Remote };
                }
            }
            None => warn!("Knowledge reference is not a fetchable address: {}", reference),
        }

        match self.store.get(Bucket::Knowledge) {
            Ok(Some(text)) => return Reconciliation { text, source: KnowledgeSource::Local },
            Ok(None) => {}
            Err(e) => warn!("Could not read local knowledge: {}", e),
        }

        if let Err(e) = self.store.put(Bucket::Knowledge, DEFAULT_KNOWLEDGE) {
            warn!("Could not persist seed knowledge: {}", e);
        }
        Reconciliation { text: DEFAULT_KNOWLEDGE.to_string(), source: KnowledgeSource::Seed }
    }
}
