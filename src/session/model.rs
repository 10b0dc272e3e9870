//! Session and segment records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// State of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingParticipants,
    Recording,
    Paused,
    Finalizing,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingParticipants => "awaiting_participants",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Active,
    StoppedClean,
    StoppedForced,
    Failed,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::StoppedClean => "stopped_clean",
            Self::StoppedForced => "stopped_forced",
            Self::Failed => "failed",
        }
    }

    /// Whether a segment with this status goes into the merge.
    pub fn is_mergeable(&self) -> bool {
        matches!(self, Self::StoppedClean | Self::StoppedForced)
    }
}

/// One recording interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub index: u32,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SegmentStatus,
    pub failure: Option<String>,
}

impl Segment {
    pub fn active(index: u32, path: PathBuf, started_at: DateTime<Utc>) -> Self {
        Self {
            index,
            path,
            started_at,
            ended_at: None,
            status: SegmentStatus::Active,
            failure: None,
        }
    }

    /// Wall-clock length of the segment; zero while still active.
    pub fn wall_duration(&self) -> Duration {
        self.ended_at
            .and_then(|end| (end - self.started_at).to_std().ok())
            .unwrap_or_default()
    }
}

/// The merged, deliverable recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration: Duration,
    pub validated: bool,
}

/// Everything known about one bot run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingSession {
    pub id: String,
    pub meeting_url: String,
    pub bot_name: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub empty_room_since: Option<DateTime<Utc>>,
    pub segments: Vec<Segment>,
    pub artifact: Option<FinalArtifact>,
    pub last_error: Option<String>,
}

impl MeetingSession {
    pub fn new(meeting_url: impl Into<String>, bot_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            meeting_url: meeting_url.into(),
            bot_name: bot_name.into(),
            state: SessionState::AwaitingParticipants,
            started_at: now,
            empty_room_since: None,
            segments: Vec::new(),
            artifact: None,
            last_error: None,
        }
    }

    /// Index the next opened segment gets. Indices start at 1 and never skip.
    pub fn next_segment_index(&self) -> u32 {
        self.segments.len() as u32 + 1
    }

    pub fn active_segment(&self) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.status == SegmentStatus::Active)
    }

    pub fn active_segment_mut(&mut self) -> Option<&mut Segment> {
        self.segments
            .iter_mut()
            .find(|s| s.status == SegmentStatus::Active)
    }

    pub fn active_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Active)
            .count()
    }

    pub fn mergeable_segments(&self) -> Vec<Segment> {
        self.segments
            .iter()
            .filter(|s| s.status.is_mergeable())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_session_state_as_str() {
        assert_eq!(SessionState::AwaitingParticipants.as_str(), "awaiting_participants");
        assert_eq!(SessionState::Recording.as_str(), "recording");
        assert_eq!(SessionState::Paused.as_str(), "paused");
        assert_eq!(SessionState::Finalizing.as_str(), "finalizing");
        assert_eq!(SessionState::Completed.as_str(), "completed");
        assert_eq!(SessionState::Aborted.as_str(), "aborted");
    }

    #[test]
    fn test_session_state_serialization() {
        let json = serde_json::to_string(&SessionState::AwaitingParticipants).unwrap();
        assert_eq!(json, "\"awaiting_participants\"");

        let parsed: SessionState = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(parsed, SessionState::Paused);
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Aborted.is_terminal());
        assert!(!SessionState::Finalizing.is_terminal());
        assert!(!SessionState::Paused.is_terminal());
    }

    #[test]
    fn test_mergeable_excludes_failed_and_active() {
        let mut session = MeetingSession::new("https://meet.example/room", "Bot", at(0));
        for (i, status) in [
            SegmentStatus::StoppedClean,
            SegmentStatus::Failed,
            SegmentStatus::StoppedForced,
            SegmentStatus::Active,
        ]
        .into_iter()
        .enumerate()
        {
            let mut seg = Segment::active(i as u32 + 1, PathBuf::from(format!("/tmp/{i}.mp4")), at(0));
            seg.status = status;
            session.segments.push(seg);
        }

        let indices: Vec<u32> = session.mergeable_segments().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(session.active_count(), 1);
        assert_eq!(session.active_segment().map(|s| s.index), Some(4));
        assert_eq!(session.next_segment_index(), 5);
    }

    #[test]
    fn test_wall_duration() {
        let mut seg = Segment::active(1, PathBuf::from("/tmp/a.mp4"), at(0));
        assert_eq!(seg.wall_duration(), Duration::ZERO);
        seg.ended_at = Some(at(90));
        assert_eq!(seg.wall_duration(), Duration::from_secs(90));
    }
}
