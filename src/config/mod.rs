use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub meeting: MeetingConfig,
    pub session: SessionConfig,
    pub recording: RecordingConfig,
    pub capture: CaptureConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeetingConfig {
    /// Conference room to join. Usually supplied through `MEETING_URL`.
    pub url: String,
    pub bot_name: String,
    /// Base URL of the browser-driver sidecar.
    pub client_url: String,
    pub client_timeout_seconds: u64,
    /// Tile ids of the bot's own preview elements.
    pub local_tile_ids: Vec<String>,
}

impl Default for MeetingConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            bot_name: "Recorder".to_string(),
            client_url: "http://127.0.0.1:3000".to_string(),
            client_timeout_seconds: 30,
            local_tile_ids: vec![
                "myVideo".to_string(),
                "myScreen".to_string(),
                "myAudio".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long the room may stay empty before the session finalizes.
    pub pause_timeout_minutes: u64,
    /// Recordings shorter than this are not uploaded.
    pub min_recording_minutes: u64,
    pub tick_seconds: u64,
    /// Give up when nobody shows up for this long. 0 waits forever.
    pub awaiting_timeout_minutes: u64,
    pub max_spawn_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pause_timeout_minutes: 1,
            min_recording_minutes: 0,
            tick_seconds: 3,
            awaiting_timeout_minutes: 30,
            max_spawn_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Segment and artifact directory. Defaults to `<data dir>/meetrec/recordings`.
    pub recordings_dir: Option<String>,
    pub artifact_filename: String,
    /// Container for segment files. Follows `artifact_filename` when unset.
    pub segment_extension: Option<String>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            recordings_dir: None,
            artifact_filename: "recording.mp4".to_string(),
            segment_extension: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub pactl_path: Option<String>,
    pub video_format: String,
    pub video_source: String,
    pub video_size: String,
    pub framerate: u32,
    pub audio_format: String,
    pub audio_source: String,
    pub video_codec: String,
    pub video_preset: String,
    pub crf: u32,
    pub pixel_format: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Case-insensitive stderr fragments that mark a segment failed.
    pub failure_keywords: Vec<String>,
    pub readiness_poll_ms: u64,
    pub readiness_attempts: u32,
    /// Sink that must exist before capture starts. Any sink will do when unset.
    pub audio_sink: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            pactl_path: None,
            video_format: "x11grab".to_string(),
            video_source: ":99.0".to_string(),
            video_size: "1280x720".to_string(),
            framerate: 25,
            audio_format: "pulse".to_string(),
            audio_source: "default".to_string(),
            video_codec: "libx264".to_string(),
            video_preset: "veryfast".to_string(),
            crf: 23,
            pixel_format: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            failure_keywords: default_failure_keywords(),
            readiness_poll_ms: 500,
            readiness_attempts: 20,
            audio_sink: None,
        }
    }
}

fn default_failure_keywords() -> Vec<String> {
    [
        "Conversion failed",
        "Cannot open display",
        "Connection refused",
        "Device or resource busy",
        "Error opening input",
        "Input/output error",
        "No space left on device",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Http,
    Local,
    #[default]
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub local_dir: Option<String>,
    pub key_prefix: String,
    pub delete_after_upload: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Disabled,
            endpoint: None,
            token: None,
            local_dir: None,
            key_prefix: "recordings".to_string(),
            delete_after_upload: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:3737".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite file. Defaults to `<data dir>/meetrec/meetrec.db`.
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no meeting URL configured (set MEETING_URL or [meeting].url)")]
    MissingMeetingUrl,
    #[error("meeting URL must be http(s): {0}")]
    InvalidMeetingUrl(String),
    #[error("bot name must not be empty")]
    EmptyBotName,
    #[error("[session].{field} must be at least {min}")]
    BelowMinimum { field: &'static str, min: u64 },
    #[error("[recording].artifact_filename must be a plain file name with an extension: {0:?}")]
    InvalidArtifactName(String),
    #[error("[storage].backend = \"{backend}\" requires [storage].{field}")]
    MissingStorageSetting {
        backend: &'static str,
        field: &'static str,
    },
    #[error("[api].bind is not a socket address: {0}")]
    InvalidBind(String),
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub bot_name: Option<String>,
}

impl Config {
    /// Load from `path`, or from the default location when none is given.
    ///
    /// A missing default file is created with default values; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from(path);
        }

        let config_path = global::config_file()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            if let Err(e) = config.save_to(&config_path) {
                warn!("Could not write default config: {:#}", e);
            }
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.url.filter(|u| !u.trim().is_empty()) {
            self.meeting.url = url.trim().to_string();
        }
        if let Some(name) = overrides.bot_name.filter(|n| !n.trim().is_empty()) {
            self.meeting.bot_name = name.trim().to_string();
        }
    }

    /// Checks everything a session needs. Run once before the session starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.meeting.url.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingMeetingUrl);
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::InvalidMeetingUrl(url.to_string()));
        }
        if self.meeting.bot_name.trim().is_empty() {
            return Err(ConfigError::EmptyBotName);
        }

        self.validate_settings()
    }

    /// Validation that does not depend on the meeting being known.
    pub fn validate_settings(&self) -> Result<(), ConfigError> {
        let minimums: [(&'static str, u64, u64); 3] = [
            ("pause_timeout_minutes", self.session.pause_timeout_minutes, 1),
            ("tick_seconds", self.session.tick_seconds, 1),
            ("max_spawn_failures", self.session.max_spawn_failures as u64, 1),
        ];
        for (field, value, min) in minimums {
            if value < min {
                return Err(ConfigError::BelowMinimum { field, min });
            }
        }

        let name = &self.recording.artifact_filename;
        let plain = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name.as_str());
        if !plain || artifact_extension(name).is_none() {
            return Err(ConfigError::InvalidArtifactName(name.clone()));
        }

        match self.storage.backend {
            StorageBackend::Http if is_blank(&self.storage.endpoint) => {
                return Err(ConfigError::MissingStorageSetting {
                    backend: "http",
                    field: "endpoint",
                });
            }
            StorageBackend::Local if is_blank(&self.storage.local_dir) => {
                return Err(ConfigError::MissingStorageSetting {
                    backend: "local",
                    field: "local_dir",
                });
            }
            _ => {}
        }

        if self.api.enabled {
            self.api_bind()?;
        }

        Ok(())
    }

    pub fn pause_timeout(&self) -> Duration {
        minutes(self.session.pause_timeout_minutes)
    }

    pub fn awaiting_timeout(&self) -> Option<Duration> {
        match self.session.awaiting_timeout_minutes {
            0 => None,
            value => Some(minutes(value)),
        }
    }

    pub fn min_recording(&self) -> Duration {
        minutes(self.session.min_recording_minutes)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.session.tick_seconds.max(1))
    }

    pub fn segment_extension(&self) -> String {
        self.recording
            .segment_extension
            .clone()
            .filter(|e| !e.trim().is_empty())
            .or_else(|| artifact_extension(&self.recording.artifact_filename))
            .unwrap_or_else(|| "mp4".to_string())
    }

    pub fn recordings_dir(&self) -> Result<PathBuf> {
        match &self.recording.recordings_dir {
            Some(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir)),
            _ => global::recordings_dir(),
        }
    }

    /// Directory holding one session's segments and artifact.
    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.recordings_dir()?.join(session_id))
    }

    pub fn ledger_path(&self) -> Result<PathBuf> {
        match &self.ledger.path {
            Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
            _ => global::db_file(),
        }
    }

    pub fn api_bind(&self) -> Result<SocketAddr, ConfigError> {
        self.api
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.api.bind.clone()))
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

fn artifact_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn with_url() -> Config {
        let mut config = Config::default();
        config.meeting.url = "https://meet.example/room".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.pause_timeout_minutes, 1);
        assert_eq!(config.session.min_recording_minutes, 0);
        assert_eq!(config.session.tick_seconds, 3);
        assert_eq!(config.session.max_spawn_failures, 3);
        assert_eq!(config.recording.artifact_filename, "recording.mp4");
        assert_eq!(config.storage.backend, StorageBackend::Disabled);
        assert!(!config.storage.delete_after_upload);
        assert!(!config.api.enabled);
        assert_eq!(config.pause_timeout(), Duration::from_secs(60));
        assert_eq!(config.awaiting_timeout(), Some(Duration::from_secs(1800)));
        assert_eq!(
            config.meeting.local_tile_ids,
            vec!["myVideo", "myScreen", "myAudio"]
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [meeting]
            url = "https://meet.example/abc"

            [session]
            pause_timeout_minutes = 5

            [storage]
            backend = "local"
            local_dir = "/srv/recordings"
            "#,
        )
        .unwrap();

        assert_eq!(config.meeting.url, "https://meet.example/abc");
        assert_eq!(config.meeting.bot_name, "Recorder");
        assert_eq!(config.session.pause_timeout_minutes, 5);
        assert_eq!(config.session.tick_seconds, 3);
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.capture.framerate, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_none_parses() {
        let config: Config = toml::from_str("[storage]\nbackend = \"none\"\n").unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Disabled);
    }

    #[test]
    fn test_missing_url_rejected() {
        assert_eq!(
            Config::default().validate(),
            Err(ConfigError::MissingMeetingUrl)
        );

        let mut config = Config::default();
        config.meeting.url = "meet.example/room".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMeetingUrl(_))
        ));
    }

    #[test]
    fn test_zero_pause_timeout_rejected() {
        let mut config = with_url();
        config.session.pause_timeout_minutes = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::BelowMinimum {
                field: "pause_timeout_minutes",
                min: 1
            })
        );
    }

    #[test]
    fn test_storage_backends_require_their_settings() {
        let mut config = with_url();
        config.storage.backend = StorageBackend::Http;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingStorageSetting { field: "endpoint", .. })
        ));

        config.storage.endpoint = Some("https://storage.example/bucket".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_artifact_name_must_be_plain() {
        let mut config = with_url();
        config.recording.artifact_filename = "../recording.mp4".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidArtifactName(_))
        ));

        config.recording.artifact_filename = "recording".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidArtifactName(_))
        ));
    }

    #[test]
    fn test_api_bind_checked_only_when_enabled() {
        let mut config = with_url();
        config.api.bind = "not an address".to_string();
        assert!(config.validate().is_ok());

        config.api.enabled = true;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBind(_))));
    }

    #[test]
    fn test_segment_extension_follows_artifact() {
        let mut config = Config::default();
        assert_eq!(config.segment_extension(), "mp4");

        config.recording.artifact_filename = "meeting.mkv".to_string();
        assert_eq!(config.segment_extension(), "mkv");

        config.recording.segment_extension = Some("ts".to_string());
        assert_eq!(config.segment_extension(), "ts");
    }

    #[test]
    fn test_awaiting_timeout_zero_disables() {
        let mut config = Config::default();
        config.session.awaiting_timeout_minutes = 0;
        assert_eq!(config.awaiting_timeout(), None);
    }

    #[test]
    fn test_huge_minute_values_saturate() {
        let mut config = Config::default();
        config.session.pause_timeout_minutes = u64::MAX;
        config.session.awaiting_timeout_minutes = u64::MAX;
        config.session.min_recording_minutes = u64::MAX / 2;

        let max = Duration::from_secs(u64::MAX);
        assert_eq!(config.pause_timeout(), max);
        assert_eq!(config.awaiting_timeout(), Some(max));
        assert_eq!(config.min_recording(), max);
    }

    #[test]
    fn test_each_session_gets_its_own_directory() {
        let mut config = Config::default();
        config.recording.recordings_dir = Some("/var/lib/meetrec".to_string());

        let first = config.session_dir("a1").unwrap();
        let second = config.session_dir("b2").unwrap();
        assert_eq!(first, PathBuf::from("/var/lib/meetrec/a1"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config = with_url();
        config.apply_overrides(Overrides {
            url: Some(" https://meet.example/other ".to_string()),
            bot_name: Some("Notetaker".to_string()),
        });
        assert_eq!(config.meeting.url, "https://meet.example/other");
        assert_eq!(config.meeting.bot_name, "Notetaker");

        config.apply_overrides(Overrides {
            url: Some("   ".to_string()),
            bot_name: None,
        });
        assert_eq!(config.meeting.url, "https://meet.example/other");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = with_url();
        config.session.min_recording_minutes = 10;
        config.save_to(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.meeting.url, "https://meet.example/room");
        assert_eq!(loaded.session.min_recording_minutes, 10);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
