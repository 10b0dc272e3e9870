//! Handle to a running capture process.
//!
//! The stop ladder is written as sequential code against [`CaptureProcess`],
//! which exposes exactly two kinds of control: "wait for exit, bounded by a
//! timeout" and "deliver a stop request".

use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Longest stderr line kept when a failure keyword matches.
const MAX_FAILURE_LINE: usize = 512;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to spawn capture process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("capture binary not found: {0}")]
    MissingBinary(String),

    #[error("segment file already exists: {}", .0.display())]
    TargetExists(std::path::PathBuf),

    #[error("failed to send {signal} to capture process {pid}: {source}")]
    Signal {
        pid: u32,
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send quit request: {0}")]
    Quit(#[source] std::io::Error),

    #[error("invalid failure keyword: {0}")]
    Keywords(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
    Kill,
}

impl StopSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
}

impl ExitReport {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait CaptureProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Ask the encoder to finish the file and exit on its own.
    async fn request_quit(&mut self) -> Result<(), CaptureError>;

    fn signal(&mut self, signal: StopSignal) -> Result<(), CaptureError>;

    /// Wait up to `timeout` for the process to exit. `None` means it is still running.
    async fn wait_for_exit(&mut self, timeout: Duration) -> Option<ExitReport>;

    /// First stderr line that matched a failure keyword, if any.
    fn failure(&self) -> Option<String>;
}

/// First failure line reported by a process, shared with its stderr scanner.
#[derive(Debug, Clone, Default)]
pub struct FailureFlag {
    inner: Arc<Mutex<Option<String>>>,
}

impl FailureFlag {
    pub fn set_once(&self, line: &str) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            let mut kept = line.trim().to_string();
            if kept.len() > MAX_FAILURE_LINE {
                let mut cut = MAX_FAILURE_LINE;
                while !kept.is_char_boundary(cut) {
                    cut -= 1;
                }
                kept.truncate(cut);
            }
            *slot = Some(kept);
        }
    }

    pub fn get(&self) -> Option<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Build the case-insensitive matcher for failure keywords.
pub fn failure_matcher(keywords: &[String]) -> Result<Regex, CaptureError> {
    let alternatives: Vec<String> = keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .map(|k| regex::escape(k.trim()))
        .collect();
    if alternatives.is_empty() {
        // Matches nothing.
        return Ok(Regex::new(r"[^\s\S]")?);
    }
    Ok(Regex::new(&format!("(?i)(?:{})", alternatives.join("|")))?)
}

/// Reads stderr line by line and only remembers the first failure line.
async fn scan_stderr(stderr: ChildStderr, keywords: Arc<Regex>, flag: FailureFlag) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if keywords.is_match(&line) {
                    warn!("Capture process reported failure: {}", line.trim());
                    flag.set_once(&line);
                }
            }
            Err(e) => {
                debug!("Stopped reading capture stderr: {}", e);
                break;
            }
        }
    }
}

/// A capture process spawned on this machine.
pub struct ChildCapture {
    child: Child,
    stdin: Option<ChildStdin>,
    failure: FailureFlag,
    exited: Option<ExitReport>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ChildCapture {
    pub fn spawn(mut command: Command, keywords: Arc<Regex>) -> Result<Self, CaptureError> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(CaptureError::Spawn)?;
        let stdin = child.stdin.take();
        let failure = FailureFlag::default();
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(scan_stderr(stderr, keywords, failure.clone())));

        Ok(Self {
            child,
            stdin,
            failure,
            exited: None,
            stderr_task,
        })
    }
}

#[async_trait]
impl CaptureProcess for ChildCapture {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn request_quit(&mut self) -> Result<(), CaptureError> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        stdin.write_all(b"q\n").await.map_err(CaptureError::Quit)?;
        stdin.flush().await.map_err(CaptureError::Quit)?;
        Ok(())
    }

    fn signal(&mut self, signal: StopSignal) -> Result<(), CaptureError> {
        if self.exited.is_some() {
            return Ok(());
        }
        let Some(pid) = self.child.id() else {
            return Ok(());
        };

        let result = match signal {
            StopSignal::Kill => self.child.start_kill(),
            StopSignal::Interrupt => send_signal(pid, signal),
            StopSignal::Terminate => send_signal(pid, signal),
        };

        result.map_err(|source| CaptureError::Signal {
            pid,
            signal: signal.as_str(),
            source,
        })
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Option<ExitReport> {
        if let Some(report) = self.exited {
            return Some(report);
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                let report = ExitReport {
                    code: status.code(),
                };
                self.exited = Some(report);
                if let Some(task) = self.stderr_task.take() {
                    // Let the scanner drain what the process wrote before exiting.
                    let _ = tokio::time::timeout(Duration::from_millis(500), task).await;
                }
                Some(report)
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for capture process: {}", e);
                None
            }
            Err(_) => None,
        }
    }

    fn failure(&self) -> Option<String> {
        self.failure.get()
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: StopSignal) -> std::io::Result<()> {
    let signo = match signal {
        StopSignal::Interrupt => libc::SIGINT,
        StopSignal::Terminate => libc::SIGTERM,
        StopSignal::Kill => libc::SIGKILL,
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, signo) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: StopSignal) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "signals are only supported on unix",
    ))
}
