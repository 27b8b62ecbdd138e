//! SQLite connection and schema

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;

/// Process-wide handle. Writes made through it are visible to every later
/// read in the same process.
pub type SharedDatabase = Arc<Mutex<Database>>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agent_executions (
    id            TEXT PRIMARY KEY,
    session_id    TEXT NOT NULL,
    agent_type    TEXT NOT NULL,
    success       INTEGER NOT NULL,
    error         TEXT,
    execution_ms  INTEGER NOT NULL,
    token_count   INTEGER NOT NULL DEFAULT 0,
    input         TEXT NOT NULL,
    output        TEXT,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agent_executions_created
    ON agent_executions(created_at);
CREATE INDEX IF NOT EXISTS idx_agent_executions_agent_created
    ON agent_executions(agent_type, created_at);
CREATE INDEX IF NOT EXISTS idx_agent_executions_session
    ON agent_executions(session_id);
";

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)
            .context("Failed to apply execution log schema")?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }
}
