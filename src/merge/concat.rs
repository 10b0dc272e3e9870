//! Stream-copy concatenation through ffmpeg's concat demuxer.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use super::merger::MergeError;

#[async_trait]
pub trait Concatenator: Send + Sync {
    /// Concatenate the files listed in `manifest` into `output` without re-encoding.
    async fn concat(&self, manifest: &Path, output: &Path) -> Result<(), MergeError>;
}

/// Characters that would break out of a quoted manifest entry.
const FORBIDDEN: [char; 4] = ['\'', '"', '\n', '\r'];

/// Render a concat manifest, refusing any path that could escape its quotes.
pub fn render_manifest(paths: &[PathBuf]) -> Result<String, MergeError> {
    let mut manifest = String::new();
    for path in paths {
        let text = path
            .to_str()
            .ok_or_else(|| MergeError::UnsafePath(path.clone()))?;
        if text.contains(FORBIDDEN) {
            return Err(MergeError::UnsafePath(path.clone()));
        }
        manifest.push_str("file '");
        manifest.push_str(text);
        manifest.push_str("'\n");
    }
    Ok(manifest)
}

pub struct FfmpegConcat {
    ffmpeg: PathBuf,
}

impl FfmpegConcat {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }
}

#[async_trait]
impl Concatenator for FfmpegConcat {
    async fn concat(&self, manifest: &Path, output: &Path) -> Result<(), MergeError> {
        info!("Concatenating segments from {:?} into {:?}", manifest, output);

        // -safe 0: manifest entries are absolute paths
        // -c copy: stream copy, no re-encode
        let result = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "concat", "-safe", "0"])
            .arg("-i")
            .arg(manifest)
            .args(["-c", "copy"])
            .arg(output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MergeError::Concat(format!("failed to run ffmpeg: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(MergeError::Concat(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        debug!("ffmpeg concat finished");
        Ok(())
    }
}
