use std::path::Path;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use chrono::DateTime;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use super::{CacheMetadata, ObjectStore};
use crate::error::{CacheError, Result};
use crate::key::CacheKey;

/// Connection settings for an S3-compatible endpoint
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    /// Path-style addressing, required by most self-hosted S3 services
    pub force_path_style: bool,
}

/// Cache archives stored in one S3 bucket
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Create a client for the configured endpoint with static credentials.
    ///
    /// Fails without any network traffic when the endpoint is not an
    /// absolute `http`/`https` URL with a host.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        validate_endpoint(&config.endpoint)?;

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.expose_secret().to_string(),
            None,
            None,
            "s3cache",
        );

        let base_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&base_config)
            .endpoint_url(&config.endpoint)
            .force_path_style(config.force_path_style)
            .build();

        info!(
            endpoint = %config.endpoint,
            bucket = %config.bucket,
            region = %config.region,
            "Connected to object store"
        );

        Ok(Self::from_client(
            Client::from_conf(s3_config),
            config.bucket.clone(),
        ))
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client, bucket: String) -> Self {
        S3Store { client, bucket }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.metadata(key).await?.is_some())
    }

    async fn metadata(&self, key: &CacheKey) -> Result<Option<CacheMetadata>> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await;

        match resp {
            Ok(resp) => Ok(Some(CacheMetadata {
                size: resp.content_length().unwrap_or(0).max(0) as u64,
                last_modified: resp
                    .last_modified()
                    .and_then(|d| DateTime::from_timestamp(d.secs(), d.subsec_nanos())),
            })),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(store_error("head", key, &err)),
        }
    }

    async fn upload(&self, local_path: &Path, key: &CacheKey) -> Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| {
                CacheError::io(
                    "Failed to open upload source",
                    local_path,
                    std::io::Error::other(e),
                )
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .body(body)
            .send()
            .await
            .map_err(|err| store_error("upload", key, &err))?;

        info!(%key, bucket = %self.bucket, "Uploaded cache archive");
        Ok(())
    }

    async fn download(&self, key: &CacheKey, local_path: &Path) -> Result<()> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|err| {
                if is_not_found(&err) {
                    CacheError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    store_error("download", key, &err)
                }
            })?;

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| CacheError::io("Failed to create download file", local_path, e))?;

        let mut body = resp.body;
        let mut written = 0u64;
        while let Some(chunk) = body.try_next().await.map_err(|e| CacheError::Store {
            operation: "download",
            key: key.to_string(),
            message: e.to_string(),
        })? {
            file.write_all(&chunk)
                .await
                .map_err(|e| CacheError::io("Failed to write download file", local_path, e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| CacheError::io("Failed to write download file", local_path, e))?;

        debug!(%key, bytes = written, "Downloaded cache archive");
        Ok(())
    }
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let invalid = |message: String| CacheError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        message,
    };

    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

/// 404-class responses mean the object is absent
fn is_not_found<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response()
        .map(|r| r.status().as_u16() == 404)
        .unwrap_or(false)
}

fn store_error<E>(
    operation: &'static str,
    key: &CacheKey,
    err: &SdkError<E, HttpResponse>,
) -> CacheError
where
    E: std::error::Error + 'static,
{
    CacheError::Store {
        operation,
        key: key.to_string(),
        message: DisplayErrorContext(err).to_string(),
    }
}
