//! Session and segment persistence.
//!
//! Raw SQL with rusqlite, no ORM. Timestamps are stored as RFC 3339 text.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

use super::init::init_db;
use crate::session::model::{FinalArtifact, MeetingSession, Segment, SessionState};

/// A session row.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub meeting_url: String,
    pub bot_name: String,
    pub state: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub artifact_path: Option<String>,
    pub artifact_bytes: Option<i64>,
    pub artifact_seconds: Option<i64>,
    pub upload_key: Option<String>,
    pub error: Option<String>,
}

/// A segment row.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentRecord {
    pub index: u32,
    pub path: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub failure: Option<String>,
}

const SESSION_COLUMNS: &str = "id, meeting_url, bot_name, state, started_at, ended_at, \
     artifact_path, artifact_bytes, artifact_seconds, upload_key, error";

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        meeting_url: row.get(1)?,
        bot_name: row.get(2)?,
        state: row.get(3)?,
        started_at: row.get(4)?,
        ended_at: row.get(5)?,
        artifact_path: row.get(6)?,
        artifact_bytes: row.get(7)?,
        artifact_seconds: row.get(8)?,
        upload_key: row.get(9)?,
        error: row.get(10)?,
    })
}

pub struct SessionRepository;

impl SessionRepository {
    pub fn insert(conn: &Connection, session: &MeetingSession) -> Result<()> {
        conn.execute(
            "INSERT INTO sessions (id, meeting_url, bot_name, state, started_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id,
                session.meeting_url,
                session.bot_name,
                session.state.as_str(),
                session.started_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert session")?;
        Ok(())
    }

    pub fn update_state(
        conn: &Connection,
        id: &str,
        state: SessionState,
        error: Option<&str>,
    ) -> Result<()> {
        conn.execute(
            "UPDATE sessions SET state = ?1, error = COALESCE(?2, error) WHERE id = ?3",
            params![state.as_str(), error, id],
        )
        .context("Failed to update session state")?;
        Ok(())
    }

    pub fn upsert_segment(conn: &Connection, session_id: &str, segment: &Segment) -> Result<()> {
        conn.execute(
            "INSERT INTO segments (session_id, segment_index, path, status, started_at, ended_at, failure) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT (session_id, segment_index) DO UPDATE SET \
             status = excluded.status, ended_at = excluded.ended_at, failure = excluded.failure",
            params![
                session_id,
                segment.index,
                segment.path.to_string_lossy(),
                segment.status.as_str(),
                segment.started_at.to_rfc3339(),
                segment.ended_at.map(|t| t.to_rfc3339()),
                segment.failure,
            ],
        )
        .context("Failed to record segment")?;
        Ok(())
    }

    /// Close the session row with its final state and artifact, if any.
    pub fn finish(
        conn: &Connection,
        session: &MeetingSession,
        ended_at: &str,
        upload_key: Option<&str>,
    ) -> Result<()> {
        let artifact: Option<&FinalArtifact> = session.artifact.as_ref();
        conn.execute(
            "UPDATE sessions SET state = ?1, ended_at = ?2, artifact_path = ?3, artifact_bytes = ?4, \
             artifact_seconds = ?5, upload_key = ?6, error = ?7 WHERE id = ?8",
            params![
                session.state.as_str(),
                ended_at,
                artifact.map(|a| a.path.to_string_lossy().into_owned()),
                artifact.map(|a| a.size_bytes as i64),
                artifact.map(|a| a.duration.as_secs() as i64),
                upload_key,
                session.last_error,
                session.id,
            ],
        )
        .context("Failed to finish session")?;
        Ok(())
    }

    pub fn get(conn: &Connection, id: &str) -> Result<Option<SessionRecord>> {
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            params![id],
            session_from_row,
        )
        .optional()
        .context("Failed to query session")
    }

    /// List sessions, newest first.
    pub fn list(conn: &Connection, limit: usize) -> Result<Vec<SessionRecord>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at DESC, created_at DESC LIMIT ?1"
            ))
            .context("Failed to prepare sessions list query")?;

        let rows = stmt
            .query_map(params![limit as i64], session_from_row)
            .context("Failed to list sessions")?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    pub fn segments(conn: &Connection, session_id: &str) -> Result<Vec<SegmentRecord>> {
        let mut stmt = conn
            .prepare(
                "SELECT segment_index, path, status, started_at, ended_at, failure \
                 FROM segments WHERE session_id = ?1 ORDER BY segment_index",
            )
            .context("Failed to prepare segments query")?;

        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(SegmentRecord {
                    index: row.get(0)?,
                    path: row.get(1)?,
                    status: row.get(2)?,
                    started_at: row.get(3)?,
                    ended_at: row.get(4)?,
                    failure: row.get(5)?,
                })
            })
            .context("Failed to query segments")?;

        let mut segments = Vec::new();
        for row in rows {
            segments.push(row?);
        }
        Ok(segments)
    }
}

/// Connection owned by the running session.
///
/// Writes are best effort: a ledger problem is logged and never stops a
/// recording.
pub struct SessionLedger {
    conn: Mutex<Connection>,
}

impl SessionLedger {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_connection(init_db(path)?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn with_conn<F>(&self, what: &str, f: F)
    where
        F: FnOnce(&Connection) -> Result<()>,
    {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = f(&conn) {
            warn!("Ledger: failed to {}: {:#}", what, e);
        }
    }

    pub fn session_started(&self, session: &MeetingSession) {
        self.with_conn("record session start", |conn| {
            SessionRepository::insert(conn, session)
        });
    }

    pub fn state_changed(&self, session: &MeetingSession) {
        self.with_conn("record state change", |conn| {
            SessionRepository::update_state(
                conn,
                &session.id,
                session.state,
                session.last_error.as_deref(),
            )
        });
    }

    pub fn segment_changed(&self, session_id: &str, segment: &Segment) {
        self.with_conn("record segment", |conn| {
            SessionRepository::upsert_segment(conn, session_id, segment)
        });
    }

    pub fn session_finished(&self, session: &MeetingSession, ended_at: &str, upload_key: Option<&str>) {
        self.with_conn("record session end", |conn| {
            SessionRepository::finish(conn, session, ended_at, upload_key)
        });
    }

    pub fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        SessionRepository::get(&conn, id)
    }

    pub fn segments(&self, session_id: &str) -> Result<Vec<SegmentRecord>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        SessionRepository::segments(&conn, session_id)
    }
}
