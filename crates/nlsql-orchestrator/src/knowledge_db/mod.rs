//! Knowledge store - SQLite-backed buckets for knowledge, learned schema, remote reference and query history
pub mod schema;
pub mod migration;
pub mod history_store;
pub use schema::*;
pub use migration::MigrationManager;
pub use history_store::HistoryStore;
use crate::error::{QueryError, QueryResult};
use chrono::{SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The single shared store. Every mutation replaces a whole bucket.
pub struct KnowledgeDatabase {
    pub history: HistoryStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl KnowledgeDatabase {
    /// Open (or create) the store file and migrate it to the current layout.
    pub fn new(db_path: &Path) -> QueryResult<Self> {
        info!("Opening knowledge store at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| QueryError::Storage(format!("creating {}: {}", parent.display(), e)))?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder().max_size(8).build(manager)?;
        Self::from_pool(pool)
    }

    /// Private in-memory store; a single pooled connection so every caller sees the same database.
    pub fn new_in_memory() -> QueryResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: Pool<SqliteConnectionManager>) -> QueryResult<Self> {
        {
            let mut conn = pool.get()?;
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }
        let pool = Arc::new(pool);
        info!("Knowledge store initialized successfully");
        Ok(Self {
            history: HistoryStore::new(Arc::clone(&pool)),
            pool,
        })
    }

    fn get_conn(&self) -> QueryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn get_with_conn(conn: &Connection, bucket: Bucket) -> rusqlite::Result<Option<String>> {
        conn.query_row("SELECT value FROM buckets WHERE name = ?1", [bucket.key()], |row| row.get(0))
            .optional()
    }

    fn put_with_conn(conn: &Connection, bucket: Bucket, value: &str) -> rusqlite::Result<()> {
        if value.is_empty() {
            conn.execute("DELETE FROM buckets WHERE name = ?1", [bucket.key()])?;
        } else {
            conn.execute(
                "INSERT INTO buckets (name, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![bucket.key(), value, Utc::now().timestamp_millis()],
            )?;
        }
        Ok(())
    }

    /// Current value of a bucket; an empty bucket reads as `None`.
    pub fn get(&self, bucket: Bucket) -> QueryResult<Option<String>> {
        let conn = self.get_conn()?;
        Ok(Self::get_with_conn(&conn, bucket)?)
    }

    /// Replace a bucket. Writing an empty string clears it.
    pub fn put(&self, bucket: Bucket, value: &str) -> QueryResult<()> {
        let conn = self.get_conn()?;
        Self::put_with_conn(&conn, bucket, value)?;
        debug!("Stored bucket '{}' ({} bytes)", bucket.key(), value.len());
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> QueryResult<()> {
        Ok(self.get_conn()?.execute_batch(sql)?)
    }

    /// Consistent snapshot of every bucket, read inside one transaction.
    pub fn export_all(&self) -> QueryResult<BackupDocument> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let knowledge = Self::get_with_conn(&tx, Bucket::Knowledge)?.unwrap_or_default();
        let schema = Self::get_with_conn(&tx, Bucket::Schema)?.unwrap_or_default();
        let remote_reference = Self::get_with_conn(&tx, Bucket::RemoteReference)?;
        let history = HistoryStore::list_with_conn(&tx)?;
        tx.commit()?;

        info!("Exported store: {} history entries", history.len());
        Ok(BackupDocument {
            knowledge,
            schema,
            history,
            remote_reference,
            exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }

    /// Serialized form of `export_all`.
    pub fn export_json(&self) -> QueryResult<String> {
        let document = self.export_all()?;
        serde_json::to_string_pretty(&document).map_err(|e| QueryError::Storage(e.to_string()))
    }

    /// Validate a backup document without touching the store.
    pub fn parse_backup(json: &str) -> QueryResult<BackupPayload> {
        let payload: BackupPayload = serde_json::from_str(json)
            .map_err(|e| QueryError::InvalidBackupFormat(e.to_string()))?;
        if payload.knowledge.is_none() && payload.schema.is_none() {
            return Err(QueryError::InvalidBackupFormat(
                "backup must contain `knowledge` or `schema`".to_string(),
            ));
        }
        Ok(payload)
    }

    /// Replace every bucket present in the payload as one atomic unit.
    pub fn import_all(&self, payload: &BackupPayload) -> QueryResult<()> {
        if payload.knowledge.is_none() && payload.schema.is_none() {
            return Err(QueryError::InvalidBackupFormat(
                "backup must contain `knowledge` or `schema`".to_string(),
            ));
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(knowledge) = &payload.knowledge {
            Self::put_with_conn(&tx, Bucket::Knowledge, knowledge)?;
        }
        if let Some(schema) = &payload.schema {
            Self::put_with_conn(&tx, Bucket::Schema, schema)?;
        }
        if let Some(reference) = &payload.remote_reference {
            Self::put_with_conn(&tx, Bucket::RemoteReference, reference)?;
        }
        if let Some(history) = &payload.history {
            HistoryStore::replace_all_with_tx(&tx, history)?;
        }
        tx.commit()?;

        info!(
            "Imported backup{}: knowledge={}, schema={}, history={}",
            payload.exported_at.as_deref().map(|at| format!(" from {}", at)).unwrap_or_default(),
            payload.knowledge.is_some(),
            payload.schema.is_some(),
            payload.history.as_ref().map(|h| h.len().to_string()).unwrap_or_else(|| "untouched".into()),
        );
        Ok(())
    }

    /// Parse and import in one step; a malformed document never reaches the store.
    pub fn import_json(&self, json: &str) -> QueryResult<()> {
        let payload = Self::parse_backup(json)?;
        self.import_all(&payload)
    }

    pub fn get_stats(&self) -> QueryResult<DatabaseStats> {
        let conn = self.get_conn()?;
        Ok(migration::get_database_stats(&conn)?)
    }
}

impl Drop for KnowledgeDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
                warn!("WAL checkpoint on close failed: {}", e);
            }
        }
    }
}
