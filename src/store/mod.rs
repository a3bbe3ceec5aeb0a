//! SQLite-backed keyed store.
//!
//! The database lives at `~/.reconnect/reconnect.db` and holds everything
//! durable: mailbox/CRM connections, scored organization rows, drafts,
//! campaigns, and per-target send state. Writes are keyed upserts scoped to
//! (user, entity-key); no cross-table transactions are needed. Scan job
//! status deliberately does not live here; it is per-process state owned
//! by the job registry.

use std::path::PathBuf;

use rusqlite::Connection;

pub mod types;
pub use types::*;

mod campaigns;
mod connections;
mod drafts;
mod organizations;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("migrations/001_baseline.sql"),
}];

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `~/.reconnect/reconnect.db` and
    /// apply pending migrations.
    pub fn open() -> Result<Self, DbError> {
        Self::open_at(Self::db_path()?)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open a fresh in-memory database with the full schema applied.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".reconnect").join("reconnect.db"))
    }
}

/// Create the `schema_version` table if missing and apply each pending
/// numbered migration exactly once.
fn run_migrations(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| DbError::Migration(format!("schema_version table: {}", e)))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| DbError::Migration(format!("read version: {}", e)))?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        conn.execute_batch(migration.sql)
            .map_err(|e| DbError::Migration(format!("v{}: {}", migration.version, e)))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )
        .map_err(|e| DbError::Migration(format!("record v{}: {}", migration.version, e)))?;
        log::info!("Applied store migration v{}", migration.version);
    }

    Ok(())
}
