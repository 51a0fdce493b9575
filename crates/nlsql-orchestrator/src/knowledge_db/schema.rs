//! Record types for the local knowledge store
use serde::{Deserialize, Serialize};

/// Single-value buckets. The history log lives in its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Knowledge,
    Schema,
    RemoteReference,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Knowledge, Bucket::Schema, Bucket::RemoteReference];

    /// Row name in the `buckets` table.
    pub fn key(&self) -> &'static str {
        match self {
            Bucket::Knowledge => "knowledge",
            Bucket::Schema => "schema",
            Bucket::RemoteReference => "remote_reference",
        }
    }
}

/// A saved, reusable query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub name: String,
    pub query: String,
    /// Milliseconds since the Unix epoch; strictly increasing across writes.
    pub timestamp: i64,
}

/// History record as it appears in a backup file. Older exports may omit ids or timestamps.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupHistoryEntry {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Export document written by `export_all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub knowledge: String,
    pub schema: String,
    pub history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_reference: Option<String>,
    /// RFC 3339 instant of the export.
    pub exported_at: String,
}

/// Import payload. Every bucket is optional; at least one of knowledge/schema must be present.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPayload {
    #[serde(default)]
    pub knowledge: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub history: Option<Vec<BackupHistoryEntry>>,
    #[serde(default)]
    pub remote_reference: Option<String>,
    #[serde(default)]
    pub exported_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub schema_version: i32,
    pub history_entries: i64,
    pub knowledge_bytes: i64,
    pub schema_bytes: i64,
    pub database_size_bytes: i64,
}
