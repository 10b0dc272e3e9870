//! Shared session status, readable by the status API while the controller runs.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::model::SessionState;

/// Snapshot of the running session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub meeting_url: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub participants: usize,
    pub active_segment: Option<u32>,
    pub segments: usize,
    pub artifact_path: Option<PathBuf>,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::AwaitingParticipants,
            session_id: None,
            meeting_url: None,
            started_at: None,
            participants: 0,
            active_segment: None,
            segments: 0,
            artifact_path: None,
            last_error: None,
        }
    }
}

impl SessionStatus {
    /// Seconds since the session started.
    pub fn uptime_seconds(&self) -> Option<u64> {
        self.started_at.map(|started| {
            let elapsed = chrono::Utc::now() - started;
            elapsed.num_seconds().max(0) as u64
        })
    }
}

/// Thread-safe handle shared between the controller and API handlers.
#[derive(Clone, Default)]
pub struct SessionStatusHandle {
    inner: Arc<Mutex<SessionStatus>>,
}

impl SessionStatusHandle {
    pub async fn get(&self) -> SessionStatus {
        self.inner.lock().await.clone()
    }

    pub async fn begin(
        &self,
        session_id: String,
        meeting_url: String,
        started_at: chrono::DateTime<chrono::Utc>,
    ) {
        let mut status = self.inner.lock().await;
        *status = SessionStatus {
            session_id: Some(session_id),
            meeting_url: Some(meeting_url),
            started_at: Some(started_at),
            ..SessionStatus::default()
        };
    }

    pub async fn set_state(&self, state: SessionState) {
        self.inner.lock().await.state = state;
    }

    pub async fn set_participants(&self, participants: usize) {
        self.inner.lock().await.participants = participants;
    }

    pub async fn set_segments(&self, active_segment: Option<u32>, segments: usize) {
        let mut status = self.inner.lock().await;
        status.active_segment = active_segment;
        status.segments = segments;
    }

    pub async fn set_artifact(&self, path: PathBuf) {
        self.inner.lock().await.artifact_path = Some(path);
    }

    pub async fn set_error(&self, error: String) {
        self.inner.lock().await.last_error = Some(error);
    }
}
