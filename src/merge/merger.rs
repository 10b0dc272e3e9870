//! Merges recorded segments into the final artifact.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::concat::{render_manifest, Concatenator};
use super::probe::MediaProbe;
use crate::session::model::{FinalArtifact, Segment, SegmentStatus};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("segment {0} is still recording")]
    SegmentStillActive(u32),

    #[error("segment file missing: {}", .0.display())]
    MissingSegment(PathBuf),

    #[error("artifact already exists, not overwriting: {}", .0.display())]
    ArtifactExists(PathBuf),

    #[error("refusing unsafe path in concat manifest: {}", .0.display())]
    UnsafePath(PathBuf),

    #[error("merged output is {output} bytes, outside tolerance for {input_total} input bytes")]
    SizeOutOfTolerance { output: u64, input_total: u64 },

    #[error("concatenation failed: {0}")]
    Concat(String),

    #[error("merge I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Artifact(FinalArtifact),
    NoArtifact,
}

/// Merged size must be within [0.6x, 1.2x] of the summed inputs.
pub fn within_tolerance(output: u64, input_total: u64) -> bool {
    let output = output as u128 * 10;
    let total = input_total as u128;
    output >= total * 6 && output <= total * 12
}

#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub output_dir: PathBuf,
    pub artifact_filename: String,
}

pub struct SegmentMerger {
    concatenator: Arc<dyn Concatenator>,
    probe: Arc<dyn MediaProbe>,
    settings: MergeSettings,
}

impl SegmentMerger {
    pub fn new(
        concatenator: Arc<dyn Concatenator>,
        probe: Arc<dyn MediaProbe>,
        settings: MergeSettings,
    ) -> Self {
        Self {
            concatenator,
            probe,
            settings,
        }
    }

    pub fn final_path(&self) -> PathBuf {
        self.settings.output_dir.join(&self.settings.artifact_filename)
    }

    fn sibling_path(&self, suffix: &str) -> PathBuf {
        let final_path = self.final_path();
        let stem = final_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("recording")
            .to_string();
        match final_path.extension().and_then(|e| e.to_str()) {
            Some(ext) if suffix != "concat" => {
                self.settings.output_dir.join(format!("{stem}.{suffix}.{ext}"))
            }
            _ => self.settings.output_dir.join(format!("{stem}.{suffix}.txt")),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.sibling_path("concat")
    }

    pub fn temp_path(&self) -> PathBuf {
        self.sibling_path("merging")
    }

    /// Merge every non-failed segment, in index order, into the final artifact.
    pub async fn merge(&self, segments: &[Segment]) -> Result<MergeOutcome, MergeError> {
        if let Some(active) = segments.iter().find(|s| s.status == SegmentStatus::Active) {
            return Err(MergeError::SegmentStillActive(active.index));
        }

        let mut inputs: Vec<&Segment> = segments.iter().filter(|s| s.status.is_mergeable()).collect();
        inputs.sort_by_key(|s| s.index);

        if inputs.is_empty() {
            info!("No recorded segments to merge");
            return Ok(MergeOutcome::NoArtifact);
        }

        let mut input_paths = Vec::with_capacity(inputs.len());
        let mut input_total = 0u64;
        for segment in &inputs {
            let meta = tokio::fs::metadata(&segment.path)
                .await
                .map_err(|_| MergeError::MissingSegment(segment.path.clone()))?;
            input_total += meta.len();
            input_paths.push(tokio::fs::canonicalize(&segment.path).await?);
        }

        let final_path = self.final_path();
        if tokio::fs::try_exists(&final_path).await? {
            return Err(MergeError::ArtifactExists(final_path));
        }
        if input_paths.len() == 1 {
            info!("Single segment, moving {:?} to {:?}", input_paths[0], final_path);
            move_file(&input_paths[0], &final_path).await?;
        } else {
            self.concat_segments(&input_paths, input_total, &final_path).await?;
        }

        let size_bytes = tokio::fs::metadata(&final_path).await?.len();
        let duration = match self.probe.duration(&final_path).await {
            Ok(duration) => duration,
            Err(e) => {
                let fallback: Duration = inputs.iter().map(|s| s.wall_duration()).sum();
                warn!(
                    "Could not probe artifact duration ({:#}), using recorded time {}s",
                    e,
                    fallback.as_secs()
                );
                fallback
            }
        };

        info!(
            "Final artifact ready: {:?} ({} bytes, {}s, {} segment(s))",
            final_path,
            size_bytes,
            duration.as_secs(),
            inputs.len()
        );

        Ok(MergeOutcome::Artifact(FinalArtifact {
            path: final_path,
            size_bytes,
            duration,
            validated: false,
        }))
    }

    async fn concat_segments(
        &self,
        inputs: &[PathBuf],
        input_total: u64,
        final_path: &Path,
    ) -> Result<(), MergeError> {
        let manifest = render_manifest(inputs)?;
        let manifest_path = self.manifest_path();
        tokio::fs::write(&manifest_path, manifest).await?;

        let temp_path = self.temp_path();
        info!(
            "Merging {} segments ({} bytes) via {:?}",
            inputs.len(),
            input_total,
            manifest_path
        );

        if let Err(e) = self.concatenator.concat(&manifest_path, &temp_path).await {
            remove_quietly(&temp_path).await;
            return Err(e);
        }

        let output = match tokio::fs::metadata(&temp_path).await {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Err(MergeError::Concat(
                    "concatenation produced no output file".to_string(),
                ))
            }
        };

        if !within_tolerance(output, input_total) {
            warn!(
                "Merged output {} bytes is outside tolerance for {} input bytes; keeping segments",
                output, input_total
            );
            remove_quietly(&temp_path).await;
            return Err(MergeError::SizeOutOfTolerance {
                output,
                input_total,
            });
        }

        tokio::fs::rename(&temp_path, final_path).await?;

        for path in inputs {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!("Failed to delete merged segment {:?}: {}", path, e);
            }
        }
        remove_quietly(&manifest_path).await;

        Ok(())
    }
}

/// Rename, falling back to copy + delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<(), MergeError> {
    if let Err(rename_err) = tokio::fs::rename(from, to).await {
        warn!("Rename failed ({}), copying instead", rename_err);
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to delete {:?}: {}", path, e);
        }
    }
}
