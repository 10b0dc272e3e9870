use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

pub fn init_db(db_path: &Path) -> Result<Connection> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let conn = Connection::open(db_path).context("Failed to open database connection")?;

    migrate(&conn)?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            meeting_url TEXT NOT NULL,
            bot_name TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'awaiting_participants',
            started_at TEXT NOT NULL,
            ended_at TEXT,
            artifact_path TEXT,
            artifact_bytes INTEGER,
            artifact_seconds INTEGER,
            upload_key TEXT,
            error TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create sessions table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at DESC)",
        [],
    )
    .context("Failed to create sessions started_at index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS segments (
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            segment_index INTEGER NOT NULL,
            path TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            failure TEXT,
            PRIMARY KEY (session_id, segment_index)
        )",
        [],
    )
    .context("Failed to create segments table")?;

    Ok(())
}
