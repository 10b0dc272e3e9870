//! Audio sink readiness probe.
//!
//! The capture process records from a PulseAudio monitor source. Starting it
//! before the sound server is up produces a segment without audio, so the
//! recorder asks this probe first.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait AudioReadiness: Send + Sync {
    async fn is_ready(&self) -> bool;
}

/// Asks `pactl` for the list of sinks.
pub struct PulseAudioReadiness {
    pactl: PathBuf,
    sink: Option<String>,
}

impl PulseAudioReadiness {
    pub fn new(pactl: PathBuf, sink: Option<String>) -> Self {
        Self { pactl, sink }
    }

    /// Whether `pactl list short sinks` output shows the sink we need.
    fn sinks_ready(output: &str, sink: Option<&str>) -> bool {
        let mut lines = output.lines().filter(|l| !l.trim().is_empty());
        match sink {
            Some(name) => lines.any(|line| line.split_whitespace().any(|field| field == name)),
            None => lines.next().is_some(),
        }
    }
}

#[async_trait]
impl AudioReadiness for PulseAudioReadiness {
    async fn is_ready(&self) -> bool {
        let probe = Command::new(&self.pactl)
            .args(["list", "short", "sinks"])
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                Self::sinks_ready(&stdout, self.sink.as_deref())
            }
            Ok(Ok(output)) => {
                debug!("pactl exited with {}", output.status);
                false
            }
            Ok(Err(e)) => {
                debug!("Failed to run pactl: {}", e);
                false
            }
            Err(_) => {
                debug!("pactl probe timed out");
                false
            }
        }
    }
}

/// Used when no readiness check is configured.
pub struct AlwaysReady;

#[async_trait]
impl AudioReadiness for AlwaysReady {
    async fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINKS: &str = "0\tauto_null\tmodule-null-sink.c\ts16le 2ch 44100Hz\tIDLE\n\
                         1\tvirtual_speaker\tmodule-null-sink.c\ts16le 2ch 48000Hz\tRUNNING\n";

    #[test]
    fn test_any_sink_is_enough_without_name() {
        assert!(PulseAudioReadiness::sinks_ready(SINKS, None));
        assert!(!PulseAudioReadiness::sinks_ready("\n  \n", None));
    }

    #[test]
    fn test_named_sink_must_be_listed() {
        assert!(PulseAudioReadiness::sinks_ready(SINKS, Some("virtual_speaker")));
        assert!(!PulseAudioReadiness::sinks_ready(SINKS, Some("virtual")));
        assert!(!PulseAudioReadiness::sinks_ready("", Some("virtual_speaker")));
    }

    #[tokio::test]
    async fn test_missing_pactl_is_not_ready() {
        let probe = PulseAudioReadiness::new(PathBuf::from("/nonexistent/pactl"), None);
        assert!(!probe.is_ready().await);
    }
}
