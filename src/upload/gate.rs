//! Final artifact validation before upload.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::store::ObjectStore;
use crate::session::model::FinalArtifact;

/// Anything smaller is assumed truncated or corrupt.
pub const MIN_ARTIFACT_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateRejection {
    #[error("recording is {size_bytes} bytes, below the {min_bytes} byte minimum")]
    TooSmall { size_bytes: u64, min_bytes: u64 },

    #[error(
        "recording is {}s long, below the {}s minimum",
        .actual.as_secs(),
        .minimum.as_secs()
    )]
    TooShort { actual: Duration, minimum: Duration },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Rejected(#[from] GateRejection),

    #[error("upload to {location} failed: {source:#}")]
    Store {
        location: String,
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReceipt {
    Uploaded { key: String },
    /// Validated but kept locally because no object store is configured.
    KeptLocal,
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub min_duration: Duration,
    pub key_prefix: String,
    pub delete_after_upload: bool,
}

pub struct UploadGate {
    store: Option<Arc<dyn ObjectStore>>,
    settings: GateSettings,
}

impl UploadGate {
    pub fn new(store: Option<Arc<dyn ObjectStore>>, settings: GateSettings) -> Self {
        Self { store, settings }
    }

    pub fn validate(&self, artifact: &FinalArtifact) -> Result<(), GateRejection> {
        if artifact.size_bytes < MIN_ARTIFACT_BYTES {
            return Err(GateRejection::TooSmall {
                size_bytes: artifact.size_bytes,
                min_bytes: MIN_ARTIFACT_BYTES,
            });
        }
        if artifact.duration < self.settings.min_duration {
            return Err(GateRejection::TooShort {
                actual: artifact.duration,
                minimum: self.settings.min_duration,
            });
        }
        Ok(())
    }

    pub fn object_key(&self, session_id: &str, artifact: &FinalArtifact) -> String {
        let filename = artifact
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("recording.mp4");
        let prefix = self.settings.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}/{}", session_id, filename)
        } else {
            format!("{}/{}/{}", prefix, session_id, filename)
        }
    }

    /// Validate the artifact and hand it to the object store.
    ///
    /// A rejected artifact is never deleted.
    pub async fn submit(
        &self,
        session_id: &str,
        artifact: &mut FinalArtifact,
    ) -> Result<UploadReceipt, UploadError> {
        if let Err(rejection) = self.validate(artifact) {
            warn!(
                "Not uploading {:?}: {}. File kept on disk.",
                artifact.path, rejection
            );
            return Err(rejection.into());
        }
        artifact.validated = true;

        let Some(store) = &self.store else {
            info!(
                "No object store configured, recording kept at {:?}",
                artifact.path
            );
            return Ok(UploadReceipt::KeptLocal);
        };

        let key = self.object_key(session_id, artifact);
        store
            .put(&key, &artifact.path)
            .await
            .map_err(|source| UploadError::Store {
                location: store.describe(),
                source,
            })?;
        info!("Recording uploaded as {}", key);

        if self.settings.delete_after_upload {
            if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
                warn!("Failed to delete uploaded recording {:?}: {}", artifact.path, e);
            }
        }

        Ok(UploadReceipt::Uploaded { key })
    }
}
