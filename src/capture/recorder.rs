//! Segment recorder: one capture process per recording segment.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::ffmpeg::CaptureLauncher;
use super::process::{CaptureError, CaptureProcess, ExitReport, StopSignal};
use super::readiness::AudioReadiness;
use crate::session::model::SegmentStatus;

/// Last stop request issued before the process exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopRung {
    Quit,
    Interrupt,
    Terminate,
    Kill,
}

impl StopRung {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quit => "quit",
            Self::Interrupt => "interrupt",
            Self::Terminate => "terminate",
            Self::Kill => "kill",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    pub rung: StopRung,
    pub exit: Option<ExitReport>,
    pub elapsed: Duration,
}

impl StopReport {
    /// Exits after quit or interrupt let the encoder finish the file.
    pub fn is_clean(&self) -> bool {
        self.exit.is_some() && self.rung <= StopRung::Interrupt
    }
}

/// Escalating stop sequence. Deadlines are cumulative from the start of the stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopLadder {
    pub interrupt_after: Duration,
    pub terminate_after: Duration,
    pub kill_after: Duration,
    /// Bound on reaping after SIGKILL.
    pub reap_grace: Duration,
}

impl Default for StopLadder {
    fn default() -> Self {
        Self {
            interrupt_after: Duration::from_secs(3),
            terminate_after: Duration::from_secs(5),
            kill_after: Duration::from_secs(7),
            reap_grace: Duration::from_secs(1),
        }
    }
}

impl StopLadder {
    pub async fn run(&self, process: &mut dyn CaptureProcess) -> StopReport {
        let started = Instant::now();
        let pid = process.id();

        if let Err(e) = process.request_quit().await {
            debug!("Quit request to capture process {:?} failed: {}", pid, e);
        }

        let rungs = [
            (self.interrupt_after, StopRung::Interrupt, StopSignal::Interrupt),
            (self.terminate_after, StopRung::Terminate, StopSignal::Terminate),
            (self.kill_after, StopRung::Kill, StopSignal::Kill),
        ];

        let mut rung = StopRung::Quit;
        for (deadline, next, signal) in rungs {
            let remaining = deadline.saturating_sub(started.elapsed());
            if let Some(exit) = process.wait_for_exit(remaining).await {
                return StopReport {
                    rung,
                    exit: Some(exit),
                    elapsed: started.elapsed(),
                };
            }

            warn!(
                "Capture process {:?} still running {:.1}s after {}, sending {}",
                pid,
                started.elapsed().as_secs_f32(),
                rung.as_str(),
                signal.as_str()
            );
            if let Err(e) = process.signal(signal) {
                warn!("{}", e);
            }
            rung = next;
        }

        let exit = process.wait_for_exit(self.reap_grace).await;
        if exit.is_none() {
            warn!("Capture process {:?} not reaped after SIGKILL", pid);
        }

        StopReport {
            rung,
            exit,
            elapsed: started.elapsed(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub recordings_dir: PathBuf,
    pub segment_extension: String,
    pub readiness_poll: Duration,
    pub readiness_attempts: u32,
    pub ladder: StopLadder,
}

/// Live segment. Owns its capture process; consumed by [`SegmentRecorder::stop`].
pub struct SegmentHandle {
    index: u32,
    path: PathBuf,
    process: Box<dyn CaptureProcess>,
}

impl SegmentHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("index", &self.index)
            .field("path", &self.path)
            .field("pid", &self.process.id())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentHealth {
    Healthy,
    Failed(String),
    Exited(ExitReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedSegment {
    pub index: u32,
    pub status: SegmentStatus,
    pub failure: Option<String>,
    pub report: StopReport,
}

pub struct SegmentRecorder {
    launcher: Arc<dyn CaptureLauncher>,
    readiness: Arc<dyn AudioReadiness>,
    settings: RecorderSettings,
}

impl SegmentRecorder {
    pub fn new(
        launcher: Arc<dyn CaptureLauncher>,
        readiness: Arc<dyn AudioReadiness>,
        settings: RecorderSettings,
    ) -> Self {
        Self {
            launcher,
            readiness,
            settings,
        }
    }

    pub fn segment_path(&self, index: u32) -> PathBuf {
        self.settings
            .recordings_dir
            .join(format!("segment-{:03}.{}", index, self.settings.segment_extension))
    }

    /// Start capturing segment `index`.
    pub async fn start(&self, index: u32) -> Result<SegmentHandle, CaptureError> {
        if !self.wait_for_audio().await {
            warn!(
                "Audio sink not ready after {} checks, starting segment {} degraded",
                self.settings.readiness_attempts, index
            );
        }

        let path = self.segment_path(index);
        if path.exists() {
            return Err(CaptureError::TargetExists(path));
        }
        let process = self.launcher.launch(&path)?;
        info!(
            "Segment {} recording started (pid {:?}): {:?}",
            index,
            process.id(),
            path
        );

        Ok(SegmentHandle {
            index,
            path,
            process,
        })
    }

    async fn wait_for_audio(&self) -> bool {
        let attempts = self.settings.readiness_attempts.max(1);
        for attempt in 1..=attempts {
            if self.readiness.is_ready().await {
                debug!("Audio sink ready after {} check(s)", attempt);
                return true;
            }
            if attempt < attempts {
                sleep(self.settings.readiness_poll).await;
            }
        }
        false
    }

    /// Non-blocking look at a live segment.
    pub async fn check(&self, handle: &mut SegmentHandle) -> SegmentHealth {
        if let Some(line) = handle.process.failure() {
            return SegmentHealth::Failed(line);
        }
        match handle.process.wait_for_exit(Duration::ZERO).await {
            Some(exit) => SegmentHealth::Exited(exit),
            None => SegmentHealth::Healthy,
        }
    }

    /// Stop a segment through the escalation ladder and classify the result.
    pub async fn stop(&self, mut handle: SegmentHandle) -> StoppedSegment {
        let report = self.settings.ladder.run(handle.process.as_mut()).await;

        let failure = match handle.process.failure() {
            Some(line) => Some(line),
            None => output_problem(&handle.path).await,
        };

        let status = if failure.is_some() {
            SegmentStatus::Failed
        } else if report.is_clean() {
            SegmentStatus::StoppedClean
        } else {
            SegmentStatus::StoppedForced
        };

        info!(
            "Segment {} stopped as {} after {} ({:.1}s)",
            handle.index,
            status.as_str(),
            report.rung.as_str(),
            report.elapsed.as_secs_f32()
        );

        StoppedSegment {
            index: handle.index,
            status,
            failure,
            report,
        }
    }
}

async fn output_problem(path: &Path) -> Option<String> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => None,
        Ok(_) => Some("capture produced an empty file".to_string()),
        Err(_) => Some("capture produced no output file".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::readiness::AlwaysReady;
    use crate::test_support::{CountingReadiness, ExitOn, FakeLauncher};
    use tempfile::TempDir;

    fn settings(dir: &Path) -> RecorderSettings {
        RecorderSettings {
            recordings_dir: dir.to_path_buf(),
            segment_extension: "mp4".to_string(),
            readiness_poll: Duration::from_millis(500),
            readiness_attempts: 4,
            ladder: StopLadder::default(),
        }
    }

    fn recorder(dir: &Path, launcher: Arc<FakeLauncher>) -> SegmentRecorder {
        SegmentRecorder::new(launcher, Arc::new(AlwaysReady), settings(dir))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resolves_within_seven_seconds_when_signals_ignored() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::new(ExitOn::Kill));
        let recorder = recorder(dir.path(), launcher.clone());

        let handle = recorder.start(1).await.unwrap();
        let stopped = recorder.stop(handle).await;

        assert_eq!(stopped.report.rung, StopRung::Kill);
        assert!(stopped.report.elapsed <= Duration::from_secs(7));
        assert_eq!(stopped.status, SegmentStatus::StoppedForced);
        assert_eq!(
            launcher.requests(),
            vec!["quit", "SIGINT", "SIGTERM", "SIGKILL"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rung_deadlines_are_cumulative() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::new(ExitOn::Terminate));
        let recorder = recorder(dir.path(), launcher.clone());

        let handle = recorder.start(1).await.unwrap();
        let stopped = recorder.stop(handle).await;

        assert_eq!(stopped.report.rung, StopRung::Terminate);
        assert_eq!(stopped.report.elapsed, Duration::from_secs(5));
        assert_eq!(stopped.status, SegmentStatus::StoppedForced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_exit_cancels_remaining_rungs() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::new(ExitOn::Quit));
        let recorder = recorder(dir.path(), launcher.clone());

        let handle = recorder.start(1).await.unwrap();
        let stopped = recorder.stop(handle).await;

        assert_eq!(stopped.report.rung, StopRung::Quit);
        assert_eq!(stopped.report.elapsed, Duration::ZERO);
        assert_eq!(stopped.status, SegmentStatus::StoppedClean);
        assert_eq!(launcher.requests(), vec!["quit"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_exit_counts_as_clean() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::new(ExitOn::Interrupt));
        let recorder = recorder(dir.path(), launcher.clone());

        let handle = recorder.start(1).await.unwrap();
        let stopped = recorder.stop(handle).await;

        assert_eq!(stopped.report.elapsed, Duration::from_secs(3));
        assert_eq!(stopped.status, SegmentStatus::StoppedClean);
        assert_eq!(launcher.requests(), vec!["quit", "SIGINT"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keyword_marks_segment_failed() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::new(ExitOn::Quit));
        launcher.fail_with("Conversion failed!");
        let recorder = recorder(dir.path(), launcher);

        let mut handle = recorder.start(1).await.unwrap();
        assert_eq!(
            recorder.check(&mut handle).await,
            SegmentHealth::Failed("Conversion failed!".to_string())
        );

        let stopped = recorder.stop(handle).await;
        assert_eq!(stopped.status, SegmentStatus::Failed);
        assert_eq!(stopped.failure.as_deref(), Some("Conversion failed!"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_output_marks_segment_failed() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::new(ExitOn::Quit).without_output());
        let recorder = recorder(dir.path(), launcher);

        let handle = recorder.start(2).await.unwrap();
        let stopped = recorder.stop(handle).await;
        assert_eq!(stopped.index, 2);
        assert_eq!(stopped.status, SegmentStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_wait_is_bounded() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::new(ExitOn::Quit));
        let readiness = Arc::new(CountingReadiness::ready_after(u32::MAX));
        let recorder = SegmentRecorder::new(launcher.clone(), readiness.clone(), settings(dir.path()));

        let started = Instant::now();
        let handle = recorder.start(1).await.unwrap();

        assert_eq!(readiness.checks(), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
        assert_eq!(launcher.launched(), vec![dir.path().join("segment-001.mp4")]);
        assert_eq!(handle.index(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_stops_polling_once_ready() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::new(ExitOn::Quit));
        let readiness = Arc::new(CountingReadiness::ready_after(2));
        let recorder = SegmentRecorder::new(launcher, readiness.clone(), settings(dir.path()));

        recorder.start(1).await.unwrap();
        assert_eq!(readiness.checks(), 2);
    }

    #[tokio::test]
    async fn test_spawn_error_is_returned() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(FakeLauncher::new(ExitOn::Quit));
        launcher.fail_spawn_on(&[1]);
        let recorder = recorder(dir.path(), launcher);

        let err = recorder.start(1).await.unwrap_err();
        assert!(matches!(err, CaptureError::Spawn(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_segment_file_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let earlier = dir.path().join("segment-001.mp4");
        std::fs::write(&earlier, b"earlier session").unwrap();
        let launcher = Arc::new(FakeLauncher::new(ExitOn::Quit));
        let recorder = recorder(dir.path(), launcher.clone());

        let err = recorder.start(1).await.unwrap_err();
        assert!(matches!(err, CaptureError::TargetExists(_)));
        assert!(launcher.launched().is_empty());
        assert_eq!(std::fs::read(&earlier).unwrap(), b"earlier session");
    }

    #[test]
    fn test_segment_path_is_zero_padded() {
        let launcher = Arc::new(FakeLauncher::new(ExitOn::Quit));
        let recorder = recorder(Path::new("/recordings"), launcher);
        assert_eq!(
            recorder.segment_path(7),
            PathBuf::from("/recordings/segment-007.mp4")
        );
    }
}
