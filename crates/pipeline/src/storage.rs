//! Object storage for clips and anchor stills.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

/// Key prefix for stored anchor images.
pub const ANCHOR_PREFIX: &str = "anchors";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fetch of {url} returned HTTP {status}")]
    HttpStatus { status: u16, url: String },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object url: {0}")]
    InvalidUrl(String),
}

/// Blob store used by the anchor deriver.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Persist an image and return a URL providers can read.
    async fn store_image(&self, bytes: &[u8]) -> Result<String, StorageError>;

    /// Download a generated clip.
    async fn fetch_clip(&self, url: &str) -> Result<Vec<u8>, StorageError>;
}

/// Filesystem store published under `base_url`. Clips hosted elsewhere are
/// fetched over HTTP(S).
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
    http: reqwest::Client,
}

impl LocalObjectStore {
    /// * `root` - directory objects are written to.
    /// * `base_url` - public URL `root` is served from.
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a URL under `base_url` (or a `file://` URL) to a path.
    ///
    /// Returns `None` for remote URLs.
    fn local_path(&self, url: &str) -> Result<Option<PathBuf>, StorageError> {
        if let Some(key) = url
            .strip_prefix(&self.base_url)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            return self.key_path(key).map(Some);
        }
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(Some(PathBuf::from(path)));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(None);
        }
        Err(StorageError::InvalidUrl(url.to_string()))
    }

    /// Join a key under `root`, refusing anything that escapes it.
    fn key_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidUrl(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn store_image(&self, bytes: &[u8]) -> Result<String, StorageError> {
        let extension = image::guess_format(bytes)
            .ok()
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("bin");
        let key = format!("{ANCHOR_PREFIX}/{}.{extension}", uuid::Uuid::new_v4());
        let path = self.key_path(&key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!(key = %key, size = bytes.len(), "Stored image");
        Ok(format!("{}/{key}", self.base_url))
    }

    async fn fetch_clip(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        if let Some(path) = self.local_path(url)? {
            return match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(StorageError::NotFound(url.to_string()))
                }
                Err(e) => Err(e.into()),
            };
        }

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
