//! Session status endpoints.
//!
//! - `GET /status`: live state of the running session
//! - `GET /sessions`: recent sessions from the ledger
//! - `GET /sessions/:id`: one session with its segments

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::api::error::{ApiError, ApiResult};
use crate::db::{init_db, SessionRepository};
use crate::session::SessionStatusHandle;

#[derive(Clone)]
pub struct StatusState {
    pub status: SessionStatusHandle,
    pub ledger_path: Option<PathBuf>,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(session_status))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", get(get_session))
        .with_state(state)
}

pub async fn session_status(State(state): State<StatusState>) -> Json<Value> {
    let status = state.status.get().await;

    Json(json!({
        "state": status.state.as_str(),
        "session_id": status.session_id,
        "meeting_url": status.meeting_url,
        "uptime_seconds": status.uptime_seconds(),
        "participants": status.participants,
        "recording": status.active_segment.is_some(),
        "active_segment": status.active_segment,
        "segments": status.segments,
        "artifact_path": status.artifact_path.map(|p| p.to_string_lossy().to_string()),
        "last_error": status.last_error,
    }))
}

fn ledger_path(state: &StatusState) -> ApiResult<PathBuf> {
    state
        .ledger_path
        .clone()
        .ok_or_else(|| ApiError::not_found("Session ledger is disabled"))
}

pub async fn list_sessions(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<StatusState>,
) -> ApiResult<Json<Value>> {
    let limit: usize = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);
    let path = ledger_path(&state)?;

    let sessions = tokio::task::spawn_blocking(move || {
        let conn = init_db(&path)?;
        SessionRepository::list(&conn, limit)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;

    Ok(Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

pub async fn get_session(
    Path(id): Path<String>,
    State(state): State<StatusState>,
) -> ApiResult<Json<Value>> {
    let path = ledger_path(&state)?;

    let lookup_id = id.clone();
    let found = tokio::task::spawn_blocking(move || {
        let conn = init_db(&path)?;
        match SessionRepository::get(&conn, &lookup_id)? {
            Some(record) => {
                let segments = SessionRepository::segments(&conn, &lookup_id)?;
                Ok::<_, anyhow::Error>(Some((record, segments)))
            }
            None => Ok(None),
        }
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;

    let (session, segments) =
        found.ok_or_else(|| ApiError::not_found(format!("Session {} not found", id)))?;

    Ok(Json(json!({
        "session": session,
        "segments": segments,
    })))
}
