use crate::error::{QueryError, QueryResult};
use crate::knowledge_db::schema::{BackupHistoryEntry, HistoryEntry};
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::sync::Arc;
use tracing::{debug, info};

/// Saved queries, keyed by store-assigned ids and read newest-first.
pub struct HistoryStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl HistoryStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> QueryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Next timestamp: wall clock in ms, bumped past the newest stored entry.
    fn next_timestamp(conn: &Connection) -> rusqlite::Result<i64> {
        let newest: i64 = conn.query_row("SELECT COALESCE(MAX(timestamp), 0) FROM query_history", [], |row| {
            row.get(0)
        })?;
        Ok(Utc::now().timestamp_millis().max(newest + 1))
    }

    fn row_to_entry(row: &Row) -> rusqlite::Result<HistoryEntry> {
        Ok(HistoryEntry {
            id: row.get(0)?,
            name: row.get(1)?,
            query: row.get(2)?,
            timestamp: row.get(3)?,
        })
    }

    pub fn append(&self, name: &str, query: &str) -> QueryResult<HistoryEntry> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let timestamp = Self::next_timestamp(&tx)?;
        tx.execute(
            "INSERT INTO query_history (name, query, timestamp) VALUES (?1, ?2, ?3)",
            params![name, query, timestamp],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        info!("Saved history entry {} ({} chars)", id, query.len());
        Ok(HistoryEntry { id, name: name.to_string(), query: query.to_string(), timestamp })
    }

    /// Rename or edit an entry; the timestamp is refreshed so it moves to the top.
    pub fn update(&self, id: i64, name: &str, query: &str) -> QueryResult<HistoryEntry> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let timestamp = Self::next_timestamp(&tx)?;
        let updated = tx.execute(
            "UPDATE query_history SET name = ?1, query = ?2, timestamp = ?3 WHERE id = ?4",
            params![name, query, timestamp, id],
        )?;
        if updated == 0 {
            return Err(QueryError::Storage(format!("history entry {} not found", id)));
        }
        tx.commit()?;

        info!("Updated history entry {}", id);
        Ok(HistoryEntry { id, name: name.to_string(), query: query.to_string(), timestamp })
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, id: i64) -> QueryResult<bool> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM query_history WHERE id = ?1", [id])?;
        info!("Deleted history entry {} ({} row)", id, deleted);
        Ok(deleted > 0)
    }

    pub fn get(&self, id: i64) -> QueryResult<Option<HistoryEntry>> {
        let conn = self.get_conn()?;
        let entry = conn
            .query_row(
                "SELECT id, name, query, timestamp FROM query_history WHERE id = ?1",
                [id],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn list(&self) -> QueryResult<Vec<HistoryEntry>> {
        let conn = self.get_conn()?;
        Ok(Self::list_with_conn(&conn)?)
    }

    pub(crate) fn list_with_conn(conn: &Connection) -> rusqlite::Result<Vec<HistoryEntry>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, query, timestamp FROM query_history ORDER BY timestamp DESC, id DESC",
        )?;
        let entries = stmt.query_map([], Self::row_to_entry)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn count(&self) -> QueryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM query_history", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Replace the whole log inside a caller-owned transaction. Ids from the backup are kept when present.
    pub(crate) fn replace_all_with_tx(conn: &Connection, entries: &[BackupHistoryEntry]) -> rusqlite::Result<()> {
        conn.execute("DELETE FROM query_history", [])?;
        let fallback_ts = Utc::now().timestamp_millis();
        for entry in entries {
            let timestamp = entry.timestamp.unwrap_or(fallback_ts);
            match entry.id {
                Some(id) => conn.execute(
                    "INSERT OR REPLACE INTO query_history (id, name, query, timestamp) VALUES (?1, ?2, ?3, ?4)",
                    params![id, entry.name, entry.query, timestamp],
                )?,
                None => conn.execute(
                    "INSERT INTO query_history (name, query, timestamp) VALUES (?1, ?2, ?3)",
                    params![entry.name, entry.query, timestamp],
                )?,
            };
        }
        debug!("Replaced query history with {} entries", entries.len());
        Ok(())
    }
}
