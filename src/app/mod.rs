//! Wires every component from the configuration and runs one session.

mod signal;

use crate::api::{ApiServer, StatusState};
use crate::capture::{
    resolve_binary, AlwaysReady, AudioReadiness, FfmpegLauncher, PulseAudioReadiness,
    RecorderSettings, SegmentRecorder, StopLadder,
};
use crate::config::{Config, StorageBackend};
use crate::db::SessionLedger;
use crate::meeting::{HttpMeetingClient, MeetingClient, ParticipantMonitor};
use crate::merge::{FfmpegConcat, FfprobeProbe, MergeSettings, SegmentMerger};
use crate::session::{
    ControllerSettings, SessionController, SessionParts, SessionReport, SessionStatusHandle,
    SystemClock,
};
use crate::upload::{GateSettings, HttpObjectStore, LocalObjectStore, ObjectStore, UploadGate};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use signal::cancel_on_signal;

/// Run one recording session to completion.
///
/// The configuration must already be validated.
pub async fn run_session(config: &Config) -> Result<SessionReport> {
    info!("Starting meetrec {}", env!("CARGO_PKG_VERSION"));

    let session_id = uuid::Uuid::new_v4().to_string();
    let session_dir = config.session_dir(&session_id)?;
    std::fs::create_dir_all(&session_dir)
        .with_context(|| format!("Failed to create session directory {:?}", session_dir))?;
    info!("Recording into {:?}", session_dir);

    let ledger = match config.ledger_path().and_then(|path| SessionLedger::open(&path)) {
        Ok(ledger) => Some(Arc::new(ledger)),
        Err(e) => {
            warn!("Session ledger unavailable, continuing without it: {:#}", e);
            None
        }
    };

    let client: Arc<dyn MeetingClient> = Arc::new(HttpMeetingClient::new(
        &config.meeting.client_url,
        Duration::from_secs(config.meeting.client_timeout_seconds),
    )?);

    let status = SessionStatusHandle::default();
    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    if config.api.enabled {
        let server = ApiServer::new(
            config.api_bind()?,
            StatusState {
                status: status.clone(),
                ledger_path: ledger.as_ref().and(config.ledger_path().ok()),
            },
        );
        let api_shutdown = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = server.start(api_shutdown).await {
                error!("Status API failed: {:#}", e);
            }
        });
    }

    let parts = SessionParts {
        client: client.clone(),
        monitor: ParticipantMonitor::new(client, &config.meeting.local_tile_ids),
        recorder: build_recorder(config, session_dir.clone())?,
        merger: build_merger(config, session_dir),
        gate: build_gate(config)?,
        clock: Arc::new(SystemClock),
    };

    let mut controller = SessionController::new(
        parts,
        ControllerSettings {
            meeting_url: config.meeting.url.clone(),
            bot_name: config.meeting.bot_name.clone(),
            pause_timeout: config.pause_timeout(),
            awaiting_timeout: config.awaiting_timeout(),
            tick_period: config.tick_period(),
            max_spawn_failures: config.session.max_spawn_failures,
        },
    )
    .with_session_id(session_id)
    .with_status(status);
    if let Some(ledger) = ledger {
        controller = controller.with_ledger(ledger);
    }

    let report = controller.run(shutdown.clone()).await;
    shutdown.cancel();

    Ok(report)
}

fn build_recorder(config: &Config, session_dir: PathBuf) -> Result<SegmentRecorder> {
    let capture = &config.capture;
    let launcher = FfmpegLauncher::new(capture)?;

    let readiness: Arc<dyn AudioReadiness> =
        match resolve_binary(capture.pactl_path.as_deref(), "pactl") {
            Ok(pactl) => Arc::new(PulseAudioReadiness::new(pactl, capture.audio_sink.clone())),
            Err(e) => {
                warn!("{}; audio readiness will not be checked", e);
                Arc::new(AlwaysReady)
            }
        };

    Ok(SegmentRecorder::new(
        Arc::new(launcher),
        readiness,
        RecorderSettings {
            recordings_dir: session_dir,
            segment_extension: config.segment_extension(),
            readiness_poll: Duration::from_millis(capture.readiness_poll_ms),
            readiness_attempts: capture.readiness_attempts,
            ladder: StopLadder::default(),
        },
    ))
}

fn build_merger(config: &Config, output_dir: PathBuf) -> SegmentMerger {
    let capture = &config.capture;
    let ffmpeg = resolve_binary(capture.ffmpeg_path.as_deref(), "ffmpeg")
        .unwrap_or_else(|_| PathBuf::from("ffmpeg"));
    let ffprobe = resolve_binary(capture.ffprobe_path.as_deref(), "ffprobe").unwrap_or_else(|e| {
        warn!("{}; artifact duration will come from segment timestamps", e);
        PathBuf::from("ffprobe")
    });

    SegmentMerger::new(
        Arc::new(FfmpegConcat::new(ffmpeg)),
        Arc::new(FfprobeProbe::new(ffprobe)),
        MergeSettings {
            output_dir,
            artifact_filename: config.recording.artifact_filename.clone(),
        },
    )
}

fn build_gate(config: &Config) -> Result<UploadGate> {
    let storage = &config.storage;
    let store: Option<Arc<dyn ObjectStore>> = match storage.backend {
        StorageBackend::Http => {
            let endpoint = storage
                .endpoint
                .as_deref()
                .context("[storage].endpoint is required for the http backend")?;
            Some(Arc::new(HttpObjectStore::new(endpoint, storage.token.clone())))
        }
        StorageBackend::Local => {
            let dir = storage
                .local_dir
                .as_deref()
                .context("[storage].local_dir is required for the local backend")?;
            Some(Arc::new(LocalObjectStore::new(PathBuf::from(dir))))
        }
        StorageBackend::Disabled => None,
    };

    if let Some(store) = &store {
        info!("Recordings will be stored at {}", store.describe());
    }

    Ok(UploadGate::new(
        store,
        GateSettings {
            min_duration: config.min_recording(),
            key_prefix: storage.key_prefix.clone(),
            delete_after_upload: storage.delete_after_upload,
        },
    ))
}
