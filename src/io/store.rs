//! Object store configuration and helpers for the data bucket.
//!
//! The same code path serves AWS S3, S3-compatible endpoints (LocalStack,
//! MinIO) and a local directory standing in for a bucket.

use crate::config::AwsConfig;
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ClientOptions, ObjectStore, ObjectStoreExt, PutPayload, RetryConfig};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Parse an S3 URI into bucket and key components.
///
/// Accepts URIs in the format `s3://bucket/key/path`.
pub fn parse_s3_uri(uri: &str) -> Result<(&str, &str)> {
    let without_scheme = uri
        .strip_prefix("s3://")
        .with_context(|| format!("Invalid S3 URI: expected 's3://' prefix in '{}'", uri))?;

    without_scheme
        .split_once('/')
        .with_context(|| format!("Invalid S3 URI: expected 's3://bucket/key' format in '{}'", uri))
}

/// Client options for the batch jobs: default-ish timeouts, small pool.
fn create_client_options(config: &AwsConfig) -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(60))
        .with_pool_idle_timeout(Duration::from_secs(90))
        .with_allow_http(config.allows_http())
}

/// Transport-level retries only. Failed items are retried by re-running the batch.
fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        backoff: object_store::BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            base: 2.0,
        },
        retry_timeout: Duration::from_secs(60),
    }
}

/// Create a store for one bucket.
///
/// Uses `LocalFileSystem` under `<use_local>/<bucket>` when `use_local` is set,
/// otherwise S3 with credentials from the environment and the configured
/// endpoint override.
pub fn create_bucket_store(bucket: &str, config: &AwsConfig) -> Result<Arc<dyn ObjectStore>> {
    if let Some(root) = &config.use_local {
        let path = std::path::Path::new(root).join(bucket);
        if !path.exists() {
            std::fs::create_dir_all(&path)?;
        }
        tracing::info!("Creating LocalFileSystem store at: {}", path.display());
        return Ok(Arc::new(LocalFileSystem::new_with_prefix(&path)?));
    }

    tracing::info!("Creating S3 client for bucket: {}", bucket);

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region(&config.region)
        .with_client_options(create_client_options(config))
        .with_retry(create_retry_config());

    builder = match &config.endpoint_url {
        // Emulators serve path-style requests only
        Some(endpoint) => builder
            .with_endpoint(endpoint)
            .with_virtual_hosted_style_request(false),
        None => builder.with_virtual_hosted_style_request(true),
    };

    Ok(Arc::new(builder.build()?))
}

/// Check that the bucket is reachable before any work is planned.
pub async fn ensure_bucket(store: &dyn ObjectStore) -> Result<()> {
    store
        .list_with_delimiter(None)
        .await
        .context("Data bucket is not reachable")?;
    Ok(())
}

/// List every object key, optionally restricted to a prefix.
pub async fn list_keys(store: &dyn ObjectStore, prefix: Option<&str>) -> Result<Vec<String>> {
    let prefix = prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(Path::from);

    let objects: Vec<_> = store
        .list(prefix.as_ref())
        .try_collect()
        .await
        .context("Failed to list bucket")?;

    let mut keys: Vec<String> = objects.into_iter().map(|meta| meta.location.to_string()).collect();
    keys.sort();
    Ok(keys)
}

/// Content hash of an object: its ETag without quotes, or the hex SHA-256 of
/// its bytes when the store does not report one.
pub async fn content_hash(store: &dyn ObjectStore, key: &str) -> Result<String> {
    let path = Path::from(key);
    let meta = store
        .head(&path)
        .await
        .with_context(|| format!("Failed to stat {}", key))?;

    match meta.e_tag.as_deref().map(|t| t.trim_matches('"')) {
        Some(tag) if !tag.is_empty() => Ok(tag.to_string()),
        _ => content_digest(store, key).await,
    }
}

/// Hex SHA-256 of an object's bytes.
///
/// Use this where the store's ETag is not derived from content, as with
/// `LocalFileSystem` (inode, mtime and size).
pub async fn content_digest(store: &dyn ObjectStore, key: &str) -> Result<String> {
    let bytes = get_bytes(store, key).await?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Fetch a whole object.
pub async fn get_bytes(store: &dyn ObjectStore, key: &str) -> Result<Bytes> {
    let path = Path::from(key);
    let bytes = store
        .get(&path)
        .await
        .with_context(|| format!("Failed to fetch {}", key))?
        .bytes()
        .await
        .with_context(|| format!("Failed to read {}", key))?;
    Ok(bytes)
}

/// Write a whole object, replacing any existing one.
pub async fn put_bytes(store: &dyn ObjectStore, key: &str, bytes: Bytes) -> Result<()> {
    let path = Path::from(key);
    store
        .put(&path, PutPayload::from(bytes))
        .await
        .with_context(|| format!("Failed to upload {}", key))?;
    Ok(())
}
