//! Object store backends for the final recording.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::info;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, path: &Path) -> Result<()>;

    /// Human readable location, for logs.
    fn describe(&self) -> String;
}

fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// Streams the file as the body of an HTTP `PUT` (S3 presigned prefix, MinIO, etc).
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.endpoint, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, path: &Path) -> Result<()> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {:?} for upload", path))?;
        let len = file.metadata().await?.len();
        let url = self.object_url(key);

        info!("Uploading {:?} ({} bytes) to {}", path, len, url);

        let mut request = self
            .client
            .put(&url)
            .header(CONTENT_LENGTH, len)
            .header(CONTENT_TYPE, mime_type(path))
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("Failed to upload recording")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Upload failed ({}): {}", status, body);
        }

        Ok(())
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}

/// Copies into a directory tree; keys become relative paths.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, path: &Path) -> Result<()> {
        if key.split('/').any(|part| part == "..") {
            bail!("Refusing object key outside the store: {}", key);
        }

        let target = self.object_path(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create object store directory")?;
        }

        tokio::fs::copy(path, &target)
            .await
            .with_context(|| format!("Failed to copy {:?} to {:?}", path, target))?;

        info!("Stored recording at {:?}", target);
        Ok(())
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
