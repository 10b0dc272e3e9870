//! Recording session orchestrator.
//!
//! Drives one bot run through its states:
//! awaiting participants → recording ⇄ paused → finalizing → completed
//!
//! Every collaborator is injected, so the whole lifecycle runs against fakes
//! in tests. The controller is the only owner of the active segment; at most
//! one capture process exists at any time.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::model::{FinalArtifact, MeetingSession, Segment, SegmentStatus, SessionState};
use super::status::SessionStatusHandle;
use crate::capture::{CaptureError, SegmentHandle, SegmentHealth, SegmentRecorder};
use crate::db::SessionLedger;
use crate::meeting::{MeetingClient, ParticipantMonitor};
use crate::merge::{MergeOutcome, SegmentMerger};
use crate::upload::{UploadError, UploadGate, UploadReceipt};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to join meeting: {0:#}")]
    Join(anyhow::Error),

    #[error("first capture failed to start: {0}")]
    FirstCapture(#[source] CaptureError),

    #[error("capture failed to start {0} times in a row")]
    SpawnFailures(u32),

    #[error("session cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub meeting_url: String,
    pub bot_name: String,
    pub pause_timeout: Duration,
    /// `None` waits for the first participant forever.
    pub awaiting_timeout: Option<Duration>,
    pub tick_period: Duration,
    pub max_spawn_failures: u32,
}

/// Collaborators the controller drives.
pub struct SessionParts {
    pub client: Arc<dyn MeetingClient>,
    pub monitor: ParticipantMonitor,
    pub recorder: SegmentRecorder,
    pub merger: SegmentMerger,
    pub gate: UploadGate,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UploadStatus {
    NotAttempted,
    Uploaded { key: String },
    KeptLocal,
    Rejected { reason: String },
    Failed { reason: String },
}

/// Outcome of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub state: SessionState,
    pub segments: usize,
    pub failed_segments: usize,
    pub artifact: Option<FinalArtifact>,
    pub upload: UploadStatus,
    pub merge_error: Option<String>,
    pub error: Option<String>,
}

impl SessionReport {
    /// Completed without a merge error and without a refused or failed upload.
    ///
    /// A session where nobody ever spoke completes without an artifact and
    /// still counts as a success.
    pub fn succeeded(&self) -> bool {
        self.state == SessionState::Completed
            && self.merge_error.is_none()
            && !matches!(
                self.upload,
                UploadStatus::Rejected { .. } | UploadStatus::Failed { .. }
            )
    }
}

pub struct SessionController {
    client: Arc<dyn MeetingClient>,
    monitor: ParticipantMonitor,
    recorder: SegmentRecorder,
    merger: SegmentMerger,
    gate: UploadGate,
    clock: Arc<dyn Clock>,
    status: SessionStatusHandle,
    ledger: Option<Arc<SessionLedger>>,
    settings: ControllerSettings,
    session: MeetingSession,
    active: Option<SegmentHandle>,
    spawn_failures: u32,
    upload: UploadStatus,
    merge_error: Option<String>,
}

impl SessionController {
    pub fn new(parts: SessionParts, settings: ControllerSettings) -> Self {
        let session = MeetingSession::new(
            settings.meeting_url.clone(),
            settings.bot_name.clone(),
            parts.clock.now(),
        );

        Self {
            client: parts.client,
            monitor: parts.monitor,
            recorder: parts.recorder,
            merger: parts.merger,
            gate: parts.gate,
            clock: parts.clock,
            status: SessionStatusHandle::default(),
            ledger: None,
            settings,
            session,
            active: None,
            spawn_failures: 0,
            upload: UploadStatus::NotAttempted,
            merge_error: None,
        }
    }

    pub fn with_status(mut self, status: SessionStatusHandle) -> Self {
        self.status = status;
        self
    }

    /// Use an id chosen up front, e.g. when it names the session's directory.
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session.id = id.into();
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<SessionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn session(&self) -> &MeetingSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Join the meeting. A join failure aborts the session before anything is recorded.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.status
            .begin(
                self.session.id.clone(),
                self.session.meeting_url.clone(),
                self.session.started_at,
            )
            .await;
        if let Some(ledger) = &self.ledger {
            ledger.session_started(&self.session);
        }

        info!(
            "Session {} joining {} as {:?}",
            self.session.id, self.session.meeting_url, self.session.bot_name
        );

        if let Err(e) = self
            .client
            .join(&self.session.meeting_url, &self.session.bot_name)
            .await
        {
            let err = SessionError::Join(e);
            self.abort(&err.to_string()).await;
            return Err(err);
        }

        info!("Joined meeting, waiting for participants");
        Ok(())
    }

    /// One step of the state machine.
    pub async fn tick(&mut self) -> Result<SessionState, SessionError> {
        let now = self.clock.now();

        match self.session.state {
            SessionState::AwaitingParticipants => {
                let count = self.observe_participants().await;
                if count >= 1 {
                    info!("{} participant(s) present, starting recording", count);
                    self.open_segment().await?;
                } else if let Some(limit) = self.settings.awaiting_timeout {
                    if elapsed(now, self.session.started_at) >= limit {
                        info!(
                            "Nobody joined within {}s, finalizing",
                            limit.as_secs()
                        );
                        self.transition(SessionState::Finalizing).await;
                    }
                }
            }
            SessionState::Recording => {
                let count = self.observe_participants().await;
                let health = match self.active.as_mut() {
                    Some(handle) => self.recorder.check(handle).await,
                    None => SegmentHealth::Exited(crate::capture::ExitReport { code: None }),
                };

                if count == 0 {
                    info!("Room is empty, pausing recording");
                    self.close_segment(failure_from(&health)).await;
                    self.session.empty_room_since = Some(now);
                    self.transition(SessionState::Paused).await;
                } else if health != SegmentHealth::Healthy {
                    warn!("Capture is no longer healthy ({:?}), replacing segment", health);
                    self.close_segment(failure_from(&health)).await;
                    self.open_segment().await?;
                }
            }
            SessionState::Paused => {
                let count = self.observe_participants().await;
                if count >= 1 {
                    info!("{} participant(s) back, resuming recording", count);
                    self.open_segment().await?;
                } else {
                    let since = *self.session.empty_room_since.get_or_insert(now);
                    let empty_for = elapsed(now, since);
                    debug!("Room empty for {}s", empty_for.as_secs());
                    if empty_for >= self.settings.pause_timeout {
                        info!(
                            "Room empty for {}s (limit {}s), finalizing",
                            empty_for.as_secs(),
                            self.settings.pause_timeout.as_secs()
                        );
                        self.transition(SessionState::Finalizing).await;
                    }
                }
            }
            SessionState::Finalizing => {
                self.finalize().await;
            }
            SessionState::Completed | SessionState::Aborted => {}
        }

        Ok(self.session.state)
    }

    async fn observe_participants(&mut self) -> usize {
        let count = self.monitor.count().await;
        self.status.set_participants(count).await;
        count
    }

    /// Start the next segment. On a spawn error the segment is recorded as
    /// failed and the session parks in `Paused` so the next tick retries.
    async fn open_segment(&mut self) -> Result<(), SessionError> {
        let index = self.session.next_segment_index();
        let first = self.session.segments.is_empty();

        match self.recorder.start(index).await {
            Ok(handle) => {
                self.spawn_failures = 0;
                let segment = Segment::active(index, handle.path().to_path_buf(), self.clock.now());
                self.record_segment(segment);
                self.active = Some(handle);
                self.session.empty_room_since = None;
                self.transition(SessionState::Recording).await;
                self.publish_segments().await;
                Ok(())
            }
            Err(e) => {
                self.spawn_failures += 1;
                let now = self.clock.now();
                self.record_segment(Segment {
                    index,
                    path: self.recorder.segment_path(index),
                    started_at: now,
                    ended_at: Some(now),
                    status: SegmentStatus::Failed,
                    failure: Some(e.to_string()),
                });
                self.publish_segments().await;

                if first {
                    let err = SessionError::FirstCapture(e);
                    self.abort(&err.to_string()).await;
                    return Err(err);
                }
                if self.spawn_failures >= self.settings.max_spawn_failures {
                    let err = SessionError::SpawnFailures(self.spawn_failures);
                    self.abort(&err.to_string()).await;
                    return Err(err);
                }

                warn!(
                    "Segment {} failed to start ({}), retrying next tick ({}/{})",
                    index, e, self.spawn_failures, self.settings.max_spawn_failures
                );
                self.session.last_error = Some(e.to_string());
                self.status.set_error(e.to_string()).await;
                // Participants were present, so the next empty tick restarts the pause timer
                self.session.empty_room_since = None;
                self.transition(SessionState::Paused).await;
                Ok(())
            }
        }
    }

    /// Stop the active segment through the escalation ladder.
    async fn close_segment(&mut self, failure: Option<String>) {
        let Some(handle) = self.active.take() else {
            return;
        };

        let stopped = self.recorder.stop(handle).await;
        let now = self.clock.now();

        let updated = self.session.active_segment_mut().map(|segment| {
            segment.ended_at = Some(now);
            segment.failure = stopped.failure.or(failure);
            segment.status = if segment.failure.is_some() {
                SegmentStatus::Failed
            } else {
                stopped.status
            };
            segment.clone()
        });

        if let Some(segment) = updated {
            if segment.status == SegmentStatus::Failed {
                warn!(
                    "Segment {} failed: {}",
                    segment.index,
                    segment.failure.as_deref().unwrap_or("unknown")
                );
            }
            if let Some(ledger) = &self.ledger {
                ledger.segment_changed(&self.session.id, &segment);
            }
        }
        self.publish_segments().await;
    }

    /// Merge, validate and upload. Always ends in `Completed`.
    pub async fn finalize(&mut self) -> SessionReport {
        if self.session.state.is_terminal() {
            return self.report();
        }
        if self.session.state != SessionState::Finalizing {
            self.close_segment(None).await;
            self.transition(SessionState::Finalizing).await;
        }

        self.leave_meeting().await;

        if self.session.mergeable_segments().is_empty() {
            info!(
                "Session {} has no recorded segments, no artifact produced",
                self.session.id
            );
        } else {
            match self.merger.merge(&self.session.segments).await {
                Ok(MergeOutcome::Artifact(mut artifact)) => {
                    self.status.set_artifact(artifact.path.clone()).await;
                    self.upload = match self.gate.submit(&self.session.id, &mut artifact).await {
                        Ok(UploadReceipt::Uploaded { key }) => UploadStatus::Uploaded { key },
                        Ok(UploadReceipt::KeptLocal) => UploadStatus::KeptLocal,
                        Err(UploadError::Rejected(rejection)) => {
                            self.fail_step(rejection.to_string()).await;
                            UploadStatus::Rejected {
                                reason: rejection.to_string(),
                            }
                        }
                        Err(e) => {
                            self.fail_step(e.to_string()).await;
                            UploadStatus::Failed {
                                reason: e.to_string(),
                            }
                        }
                    };
                    self.session.artifact = Some(artifact);
                }
                Ok(MergeOutcome::NoArtifact) => {
                    info!("Merge produced no artifact");
                }
                Err(e) => {
                    error!("Merge failed, segments kept on disk: {}", e);
                    self.merge_error = Some(e.to_string());
                    self.fail_step(e.to_string()).await;
                }
            }
        }

        self.transition(SessionState::Completed).await;
        self.finish_ledger();

        let report = self.report();
        info!(
            "Session {} completed: {} segment(s), upload {:?}",
            report.session_id, report.segments, report.upload
        );
        report
    }

    /// Stop everything and end the session without producing an artifact.
    /// Segment files are left on disk.
    pub async fn abort(&mut self, reason: &str) -> SessionReport {
        if self.session.state.is_terminal() {
            return self.report();
        }

        error!("Aborting session {}: {}", self.session.id, reason);
        self.close_segment(None).await;
        self.leave_meeting().await;

        self.session.last_error = Some(reason.to_string());
        self.status.set_error(reason.to_string()).await;
        self.transition(SessionState::Aborted).await;
        self.finish_ledger();

        self.report()
    }

    /// Tick until the session ends or `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) -> SessionReport {
        if self.start().await.is_err() {
            return self.report();
        }

        let mut ticker = tokio::time::interval(self.settings.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.abort(&SessionError::Cancelled.to_string()).await;
                    break;
                }
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(SessionState::Finalizing) => {
                    self.finalize().await;
                    break;
                }
                Ok(state) if state.is_terminal() => break,
                Ok(_) => {}
                Err(e) => {
                    error!("Session ended: {}", e);
                    break;
                }
            }
        }

        self.report()
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.session.id.clone(),
            state: self.session.state,
            segments: self.session.segments.len(),
            failed_segments: self
                .session
                .segments
                .iter()
                .filter(|s| s.status == SegmentStatus::Failed)
                .count(),
            artifact: self.session.artifact.clone(),
            upload: self.upload.clone(),
            merge_error: self.merge_error.clone(),
            error: self.session.last_error.clone(),
        }
    }

    async fn leave_meeting(&self) {
        if let Err(e) = self.client.close().await {
            warn!("Failed to leave meeting cleanly: {:#}", e);
        }
    }

    async fn fail_step(&mut self, message: String) {
        self.session.last_error = Some(message.clone());
        self.status.set_error(message).await;
    }

    async fn transition(&mut self, state: SessionState) {
        if self.session.state == state {
            return;
        }
        debug!("Session state {} -> {}", self.session.state, state);
        self.session.state = state;
        self.status.set_state(state).await;
        if let Some(ledger) = &self.ledger {
            ledger.state_changed(&self.session);
        }
    }

    fn record_segment(&mut self, segment: Segment) {
        if let Some(ledger) = &self.ledger {
            ledger.segment_changed(&self.session.id, &segment);
        }
        self.session.segments.push(segment);
    }

    async fn publish_segments(&self) {
        let active = self.session.active_segment().map(|s| s.index);
        self.status
            .set_segments(active, self.session.segments.len())
            .await;
    }

    fn finish_ledger(&self) {
        if let Some(ledger) = &self.ledger {
            let key = match &self.upload {
                UploadStatus::Uploaded { key } => Some(key.as_str()),
                _ => None,
            };
            ledger.session_finished(&self.session, &self.clock.now().to_rfc3339(), key);
        }
    }
}

fn elapsed(now: chrono::DateTime<chrono::Utc>, since: chrono::DateTime<chrono::Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

/// Failure to record for a segment whose capture went bad on its own.
fn failure_from(health: &SegmentHealth) -> Option<String> {
    match health {
        SegmentHealth::Healthy => None,
        SegmentHealth::Failed(line) => Some(line.clone()),
        SegmentHealth::Exited(exit) if exit.success() => None,
        SegmentHealth::Exited(exit) => Some(match exit.code {
            Some(code) => format!("capture exited unexpectedly with code {}", code),
            None => "capture was killed unexpectedly".to_string(),
        }),
    }
}
