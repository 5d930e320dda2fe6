//! URL-addressed artifact storage.
//!
//! Uploads return a URL that external services can fetch. Downloads accept
//! either one of our URLs or an arbitrary provider URL.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::client::R2Client;
use crate::error::{StorageError, StorageResult};
use crate::keys::content_type_for;

/// Timeout for plain HTTP downloads of provider outputs.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Durable blob storage reachable by URL.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload a local file under `key` and return its URL.
    async fn upload(&self, path: &Path, key: &str) -> StorageResult<String>;

    /// Fetch `url` into `dest`.
    async fn download(&self, url: &str, dest: &Path) -> StorageResult<()>;
}

/// Stream an HTTP(S) resource to a file.
pub async fn download_url(http: &reqwest::Client, url: &str, dest: &Path) -> StorageResult<()> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(StorageError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    debug!(url, bytes = written, dest = %dest.display(), "Downloaded URL");
    Ok(())
}

/// Artifact store backed by R2.
#[derive(Clone)]
pub struct R2ArtifactStore {
    client: R2Client,
    http: reqwest::Client,
}

impl R2ArtifactStore {
    pub fn new(client: R2Client) -> StorageResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| StorageError::config_error(e.to_string()))?;
        Ok(Self { client, http })
    }
}

#[async_trait]
impl ArtifactStore for R2ArtifactStore {
    async fn upload(&self, path: &Path, key: &str) -> StorageResult<String> {
        self.client
            .upload_file(path, key, content_type_for(key))
            .await?;
        self.client.object_url(key).await
    }

    async fn download(&self, url: &str, dest: &Path) -> StorageResult<()> {
        match self.client.key_for_url(url) {
            Some(key) => self.client.download_file(&key, dest).await,
            None => download_url(&self.http, url, dest).await,
        }
    }
}

/// Artifact store on the local filesystem, for development runs.
///
/// URLs are `file://` URLs, so only locally hosted providers can read them.
#[derive(Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
    http: reqwest::Client,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn upload(&self, path: &Path, key: &str) -> StorageResult<String> {
        if key.split('/').any(|part| part == "..") {
            return Err(StorageError::invalid_url(format!("invalid key: {}", key)));
        }
        let target = self.root.join(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(path, &target).await?;

        let absolute = tokio::fs::canonicalize(&target).await?;
        let url = url::Url::from_file_path(&absolute)
            .map_err(|_| StorageError::invalid_url(absolute.display().to_string()))?;
        info!(key, "Stored artifact locally");
        Ok(url.to_string())
    }

    async fn download(&self, url: &str, dest: &Path) -> StorageResult<()> {
        let parsed =
            url::Url::parse(url).map_err(|e| StorageError::invalid_url(format!("{}: {}", url, e)))?;
        if parsed.scheme() != "file" {
            return download_url(&self.http, url, dest).await;
        }

        let source = parsed
            .to_file_path()
            .map_err(|_| StorageError::invalid_url(url.to_string()))?;
        if !source.exists() {
            return Err(StorageError::not_found(url));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, dest).await?;
        Ok(())
    }
}
