//! R2 client implementation.

use std::path::Path;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Longest lifetime S3-style presigned URLs accept.
const MAX_PRESIGN_TTL_SECS: u64 = 7 * 24 * 3600;

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Public base URL of the bucket; presigned URLs are used when unset
    pub public_base_url: Option<String>,
    /// Lifetime of presigned artifact URLs
    pub presign_ttl: Duration,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| StorageError::config_error(format!("{} not set", name)))
        };
        Ok(Self {
            endpoint_url: required("R2_ENDPOINT_URL")?,
            access_key_id: required("R2_ACCESS_KEY_ID")?,
            secret_access_key: required("R2_SECRET_ACCESS_KEY")?,
            bucket_name: required("R2_BUCKET_NAME")?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            public_base_url: std::env::var("R2_PUBLIC_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .map(|s| s.trim_end_matches('/').to_string()),
            presign_ttl: Duration::from_secs(
                std::env::var("R2_PRESIGN_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(24 * 3600)
                    .min(MAX_PRESIGN_TTL_SECS),
            ),
        })
    }
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
    public_base_url: Option<String>,
    presign_ttl: Duration,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub async fn new(config: R2Config) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            public_base_url: config.public_base_url,
            presign_ttl: config.presign_ttl,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::new(R2Config::from_env()?).await
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload a file to R2.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        let path = path.as_ref();
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(())
    }

    /// Download object as bytes.
    pub async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        debug!("Downloading {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::not_found(key)
                } else {
                    StorageError::download_failed(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    /// Download object to a file.
    pub async fn download_file(&self, key: &str, path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        let bytes = self.download_bytes(key).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;

        info!("Downloaded {} to {}", key, path.display());
        Ok(())
    }

    /// Generate a presigned URL for GET.
    pub async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    /// URL external services can fetch `key` from.
    pub async fn object_url(&self, key: &str) -> StorageResult<String> {
        match &self.public_base_url {
            Some(base) => Ok(format!("{}/{}", base, key)),
            None => self.presign_get(key, self.presign_ttl).await,
        }
    }

    /// Recover the object key from one of our URLs.
    pub fn key_for_url(&self, url: &str) -> Option<String> {
        if let Some(base) = &self.public_base_url {
            if let Some(key) = url.strip_prefix(base.as_str()) {
                return Some(key.trim_start_matches('/').to_string());
            }
        }

        // Presigned path-style URL: {endpoint}/{bucket}/{key}?X-Amz-...
        let parsed = url::Url::parse(url).ok()?;
        if !parsed.query_pairs().any(|(k, _)| k == "X-Amz-Signature") {
            return None;
        }
        let path = parsed.path().trim_start_matches('/');
        path.strip_prefix(&format!("{}/", self.bucket))
            .map(str::to_string)
    }

    /// Check connectivity to R2 by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("R2 connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn client(public_base_url: Option<&str>) -> R2Client {
        R2Client::new(R2Config {
            endpoint_url: "https://account.r2.cloudflarestorage.com".into(),
            access_key_id: "key".into(),
            secret_access_key: "secret".into(),
            bucket_name: "storyvox".into(),
            region: "auto".into(),
            public_base_url: public_base_url.map(str::to_string),
            presign_ttl: Duration::from_secs(3600),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_public_url_round_trip() {
        let client = client(Some("https://media.storyvox.app")).await;
        let url = client.object_url("jobs/j1/final.mp4").await.unwrap();
        assert_eq!(url, "https://media.storyvox.app/jobs/j1/final.mp4");
        assert_eq!(client.key_for_url(&url).as_deref(), Some("jobs/j1/final.mp4"));
        assert!(client.key_for_url("https://provider.example.com/out.mp4").is_none());
    }

    #[tokio::test]
    async fn test_presigned_url_maps_back_to_key() {
        let client = client(None).await;
        let url = client.object_url("jobs/j1/stems/vocals.wav").await.unwrap();
        assert!(url.contains("X-Amz-Signature"));
        assert_eq!(
            client.key_for_url(&url).as_deref(),
            Some("jobs/j1/stems/vocals.wav")
        );
    }
}
