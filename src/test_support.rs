//! In-process fakes for the session collaborators.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capture::ffmpeg::CaptureLauncher;
use crate::capture::process::{CaptureError, CaptureProcess, ExitReport, FailureFlag, StopSignal};
use crate::capture::readiness::AudioReadiness;
use crate::meeting::client::{MediaTile, MeetingClient};
use crate::merge::concat::Concatenator;
use crate::merge::merger::MergeError;
use crate::merge::probe::MediaProbe;

pub const MIB: u64 = 1024 * 1024;

/// Create a sparse file of `len` bytes.
pub fn sized_file(dir: &Path, name: &str, len: u64) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    file.set_len(len).unwrap();
    path
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// Meeting client

/// Plays back a script of visible tile lists, repeating the last one.
#[derive(Default)]
pub struct ScriptedMeetingClient {
    script: Mutex<VecDeque<Vec<MediaTile>>>,
    current: Mutex<Vec<MediaTile>>,
    failing_probes: AtomicUsize,
    probes: AtomicUsize,
    join_fails: AtomicBool,
    joins: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedMeetingClient {
    pub fn with_tiles(script: Vec<Vec<MediaTile>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn with_counts(counts: &[usize]) -> Self {
        Self::with_tiles(counts.iter().map(|&n| peers(n)).collect())
    }

    pub fn fail_next_probes(&self, n: usize) {
        self.failing_probes.store(n, Ordering::SeqCst);
    }

    pub fn fail_join(&self) {
        self.join_fails.store(true, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

fn peers(n: usize) -> Vec<MediaTile> {
    let mut tiles = vec![MediaTile::local("myVideo")];
    tiles.extend((1..=n).map(|i| MediaTile::remote(format!("peer-{i}"))));
    tiles
}

#[async_trait]
impl MeetingClient for ScriptedMeetingClient {
    async fn join(&self, _meeting_url: &str, _bot_name: &str) -> Result<()> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if self.join_fails.load(Ordering::SeqCst) {
            bail!("meeting page did not load");
        }
        Ok(())
    }

    async fn visible_tiles(&self) -> Result<Vec<MediaTile>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_probes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_probes.store(failing - 1, Ordering::SeqCst);
            return Err(anyhow!("page evaluation timed out"));
        }

        let mut current = lock(&self.current);
        if let Some(next) = lock(&self.script).pop_front() {
            *current = next;
        }
        Ok(current.clone())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// Capture

/// The stop request a fake capture process finally obeys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOn {
    Quit,
    Interrupt,
    Terminate,
    Kill,
}

#[derive(Default)]
struct FakeProcessState {
    failure: FailureFlag,
    exit: Mutex<Option<ExitReport>>,
}

struct FakeCapture {
    pid: u32,
    exit_on: ExitOn,
    state: Arc<FakeProcessState>,
    requests: Arc<Mutex<Vec<&'static str>>>,
}

impl FakeCapture {
    fn exit(&self, code: Option<i32>) {
        lock(&self.state.exit).get_or_insert(ExitReport { code });
    }
}

#[async_trait]
impl CaptureProcess for FakeCapture {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn request_quit(&mut self) -> Result<(), CaptureError> {
        lock(&self.requests).push("quit");
        if self.exit_on == ExitOn::Quit {
            self.exit(Some(0));
        }
        Ok(())
    }

    fn signal(&mut self, signal: StopSignal) -> Result<(), CaptureError> {
        lock(&self.requests).push(signal.as_str());
        let obeyed = match signal {
            StopSignal::Interrupt => self.exit_on == ExitOn::Interrupt,
            StopSignal::Terminate => self.exit_on == ExitOn::Terminate,
            StopSignal::Kill => true,
        };
        if obeyed {
            self.exit(None);
        }
        Ok(())
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Option<ExitReport> {
        let exited = *lock(&self.state.exit);
        if exited.is_some() {
            return exited;
        }
        tokio::time::sleep(timeout).await;
        *lock(&self.state.exit)
    }

    fn failure(&self) -> Option<String> {
        self.state.failure.get()
    }
}

/// Hands out [`FakeCapture`] processes and records what it was asked to do.
pub struct FakeLauncher {
    exit_on: ExitOn,
    write_output: bool,
    segment_bytes: u64,
    launches: AtomicU32,
    spawn_failures: Mutex<Vec<u32>>,
    pending_failure: Mutex<Option<String>>,
    current: Mutex<Option<Arc<FakeProcessState>>>,
    requests: Arc<Mutex<Vec<&'static str>>>,
    launched: Mutex<Vec<PathBuf>>,
}

impl FakeLauncher {
    pub fn new(exit_on: ExitOn) -> Self {
        Self {
            exit_on,
            write_output: true,
            segment_bytes: 64 * 1024,
            launches: AtomicU32::new(0),
            spawn_failures: Mutex::new(Vec::new()),
            pending_failure: Mutex::new(None),
            current: Mutex::new(None),
            requests: Arc::new(Mutex::new(Vec::new())),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn without_output(mut self) -> Self {
        self.write_output = false;
        self
    }

    pub fn with_segment_bytes(mut self, bytes: u64) -> Self {
        self.segment_bytes = bytes;
        self
    }

    /// Report `line` as a failure on the live process, or the next one launched.
    pub fn fail_with(&self, line: &str) {
        match lock(&self.current).as_ref() {
            Some(state) => state.failure.set_once(line),
            None => *lock(&self.pending_failure) = Some(line.to_string()),
        }
    }

    /// Make the live process exit on its own with `code`.
    pub fn exit_current(&self, code: i32) {
        if let Some(state) = lock(&self.current).as_ref() {
            lock(&state.exit).get_or_insert(ExitReport { code: Some(code) });
        }
    }

    /// Fail the given 1-based launch attempts with a spawn error.
    pub fn fail_spawn_on(&self, attempts: &[u32]) {
        lock(&self.spawn_failures).extend_from_slice(attempts);
    }

    pub fn requests(&self) -> Vec<&'static str> {
        lock(&self.requests).clone()
    }

    pub fn launched(&self) -> Vec<PathBuf> {
        lock(&self.launched).clone()
    }
}

impl CaptureLauncher for FakeLauncher {
    fn launch(&self, target: &Path) -> Result<Box<dyn CaptureProcess>, CaptureError> {
        let attempt = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        if lock(&self.spawn_failures).contains(&attempt) {
            return Err(CaptureError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "ffmpeg: not found",
            )));
        }

        if self.write_output {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(CaptureError::Spawn)?;
            }
            let file = std::fs::File::create(target).map_err(CaptureError::Spawn)?;
            file.set_len(self.segment_bytes).map_err(CaptureError::Spawn)?;
        }

        let state = Arc::new(FakeProcessState::default());
        if let Some(line) = lock(&self.pending_failure).take() {
            state.failure.set_once(&line);
        }
        *lock(&self.current) = Some(state.clone());
        lock(&self.launched).push(target.to_path_buf());

        Ok(Box::new(FakeCapture {
            pid: 4000 + attempt,
            exit_on: self.exit_on,
            state,
            requests: self.requests.clone(),
        }))
    }
}

/// Reports ready from the `n`th check on.
pub struct CountingReadiness {
    ready_after: u32,
    checks: AtomicU32,
}

impl CountingReadiness {
    pub fn ready_after(n: u32) -> Self {
        Self {
            ready_after: n,
            checks: AtomicU32::new(0),
        }
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioReadiness for CountingReadiness {
    async fn is_ready(&self) -> bool {
        let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        n >= self.ready_after
    }
}

// Merge

/// Writes an output file of a fixed size instead of running ffmpeg.
pub struct FakeConcat {
    output_bytes: u64,
    fail: bool,
    calls: AtomicUsize,
    last_manifest: Mutex<Option<String>>,
}

impl FakeConcat {
    pub fn writing(output_bytes: u64) -> Self {
        Self {
            output_bytes,
            fail: false,
            calls: AtomicUsize::new(0),
            last_manifest: Mutex::new(None),
        }
    }

    /// Leaves a partial output of `partial_bytes` behind, then fails.
    pub fn failing(partial_bytes: u64) -> Self {
        Self {
            fail: true,
            ..Self::writing(partial_bytes)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_manifest(&self) -> Option<String> {
        lock(&self.last_manifest).clone()
    }
}

#[async_trait]
impl Concatenator for FakeConcat {
    async fn concat(&self, manifest: &Path, output: &Path) -> Result<(), MergeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_manifest) = Some(std::fs::read_to_string(manifest)?);

        let file = std::fs::File::create(output)?;
        file.set_len(self.output_bytes)?;

        if self.fail {
            return Err(MergeError::Concat(
                "Invalid data found when processing input".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct FakeProbe {
    duration: Option<Duration>,
}

impl FakeProbe {
    pub fn failing() -> Self {
        Self { duration: None }
    }

    pub fn returning(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
        }
    }
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn duration(&self, _path: &Path) -> Result<Duration> {
        self.duration.ok_or_else(|| anyhow!("ffprobe unavailable"))
    }
}
