//! Store layout migrations

use rusqlite::{Connection, OptionalExtension, Result};
use tracing::{error, info, warn};

use crate::knowledge_db::schema::DatabaseStats;

/// Latest layout version; bump together with `get_migrations`.
pub const CURRENT_VERSION: i32 = 3;

/// Brings a connection's layout up to `CURRENT_VERSION`
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Create the version table and apply every pending migration. Safe to call on every open.
    pub fn initialize_database(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        if current_version >= CURRENT_VERSION {
            info!("Knowledge store layout is current (version {})", current_version);
            return Ok(());
        }

        info!("Knowledge store layout version {} → {}", current_version, CURRENT_VERSION);
        self.apply_migrations(current_version)
    }

    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;

            info!("Migration {} applied successfully", version);
        }
        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        current_version(self.conn)
    }

    pub fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row("SELECT 1 FROM schema_version WHERE version = ?1", [version], |_| Ok(1))
            .optional()
            .map(|result| result.is_some())
    }
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![
        (1, include_str!("migrations/001_initial.sql")),
        (2, include_str!("migrations/002_add_query_history.sql")),
        (3, include_str!("migrations/003_single_value_buckets.sql")),
    ]
}

pub fn current_version(conn: &Connection) -> Result<i32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
}

/// Read-only statistics; missing tables count as empty.
pub fn get_database_stats(conn: &Connection) -> Result<DatabaseStats> {
    let history_entries = conn
        .query_row("SELECT COUNT(*) FROM query_history", [], |row| row.get(0))
        .unwrap_or_else(|e| {
            warn!("Failed to count query history: {}", e);
            0
        });

    let bucket_len = |name: &str| -> i64 {
        conn.query_row("SELECT LENGTH(CAST(value AS BLOB)) FROM buckets WHERE name = ?1", [name], |row| row.get(0))
            .unwrap_or(0)
    };

    let database_size_bytes: i64 = conn
        .query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(DatabaseStats {
        schema_version: current_version(conn).unwrap_or(0),
        history_entries,
        knowledge_bytes: bucket_len("knowledge"),
        schema_bytes: bucket_len("schema"),
        database_size_bytes,
    })
}
