//! Media duration probing via ffprobe.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn duration(&self, path: &Path) -> Result<Duration>;
}

pub struct FfprobeProbe {
    ffprobe: PathBuf,
}

impl FfprobeProbe {
    pub fn new(ffprobe: PathBuf) -> Self {
        Self { ffprobe }
    }

    fn parse_duration(stdout: &str) -> Result<Duration> {
        let raw = stdout.trim();
        let seconds: f64 = raw
            .parse()
            .with_context(|| format!("Unexpected ffprobe duration: {:?}", raw))?;
        if !seconds.is_finite() || seconds < 0.0 {
            bail!("Invalid media duration: {}", seconds);
        }
        Ok(Duration::from_secs_f64(seconds))
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn duration(&self, path: &Path) -> Result<Duration> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .context("Failed to run ffprobe")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("ffprobe failed: {}", stderr.trim());
        }

        Self::parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}
