//! Object storage access
//!
//! **[KYC-ST-010]** Documents live in bucket storage: `kyc-docs` (private,
//! individual), `agency` (private, agency), `users` (public). URL resolution
//! follows one rule everywhere: signed URLs for private buckets, public URLs
//! only for intentionally public buckets.
//!
//! Transient fetch failures are retried up to 3 times with exponential
//! backoff (100ms, 400ms, 1.6s); persistent failure surfaces to the caller,
//! which records the document as SKIPPED without aborting siblings.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Private buckets require signed URLs
pub const PRIVATE_BUCKETS: [&str; 2] = ["kyc-docs", "agency"];

/// Retry backoff schedule for transient fetch failures
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(400),
    Duration::from_millis(1600),
];

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Object does not exist
    #[error("Object not found: {bucket}/{path}")]
    NotFound { bucket: String, path: String },

    /// Transient failure; the caller may retry
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Permanent failure; retrying will not help
    #[error("Storage error: {0}")]
    Permanent(String),
}

/// Object storage interface
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Fetch raw object bytes
    async fn fetch_bytes(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Time-limited signed URL for a private object
    fn signed_url(&self, bucket: &str, path: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Stable public URL; only meaningful for public buckets
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Whether a bucket requires signed access
pub fn is_private_bucket(bucket: &str) -> bool {
    PRIVATE_BUCKETS.contains(&bucket)
}

/// Canonical object path for an uploaded KYC document
///
/// Individual: `user_{id}/kyc/{role}_{timestamp}.{ext}`;
/// agency: `agency_{id}/kyc/{role}_{timestamp}.{ext}`.
pub fn kyc_object_path(
    owner_prefix: &str,
    owner_id: uuid::Uuid,
    role: &str,
    timestamp: i64,
    ext: &str,
) -> String {
    format!(
        "{}_{}/kyc/{}_{}.{}",
        owner_prefix,
        owner_id,
        role.to_lowercase(),
        timestamp,
        ext
    )
}

/// The single URL resolver: signed for private buckets, public otherwise
pub fn resolve_url(
    storage: &dyn ObjectStorage,
    bucket: &str,
    path: &str,
    ttl: Duration,
) -> Result<String, StorageError> {
    if is_private_bucket(bucket) {
        storage.signed_url(bucket, path, ttl)
    } else {
        Ok(storage.public_url(bucket, path))
    }
}

/// Fetch with the transient-failure retry schedule
///
/// NotFound and permanent errors return immediately; transient errors are
/// retried through the backoff schedule before giving up.
pub async fn fetch_with_retry(
    storage: &dyn ObjectStorage,
    bucket: &str,
    path: &str,
) -> Result<Vec<u8>, StorageError> {
    let mut last_error = None;
    for (attempt, backoff) in std::iter::once(None)
        .chain(RETRY_BACKOFF.iter().map(Some))
        .enumerate()
    {
        if let Some(delay) = backoff {
            tracing::warn!(
                bucket,
                path,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                "Transient storage error, will retry after backoff"
            );
            tokio::time::sleep(*delay).await;
        }
        match storage.fetch_bytes(bucket, path).await {
            Ok(bytes) => return Ok(bytes),
            Err(e @ StorageError::Transient(_)) => {
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| StorageError::Transient("retries exhausted".to_string())))
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// HTTP bucket-storage client
///
/// Objects are addressed as `{base_url}/{bucket}/{path}`. Signed URLs carry
/// an expiry and a SHA-256 token over (secret, bucket, path, expiry).
pub struct HttpObjectStorage {
    client: reqwest::Client,
    base_url: String,
    signing_secret: String,
}

impl HttpObjectStorage {
    pub fn new(base_url: String, signing_secret: String) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StorageError::Permanent(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            signing_secret,
        })
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, bucket, path.trim_start_matches('/'))
    }

    fn sign(&self, bucket: &str, path: &str, expires_unix: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_secret.as_bytes());
        hasher.update(b"\x00");
        hasher.update(bucket.as_bytes());
        hasher.update(b"\x00");
        hasher.update(path.as_bytes());
        hasher.update(b"\x00");
        hasher.update(expires_unix.to_be_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait::async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn fetch_bytes(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError> {
        let url = if is_private_bucket(bucket) {
            self.signed_url(bucket, path, Duration::from_secs(60))?
        } else {
            self.object_url(bucket, path)
        };

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                StorageError::Transient(e.to_string())
            } else {
                StorageError::Permanent(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| StorageError::Transient(e.to_string()))
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            })
        } else if status.is_server_error() {
            Err(StorageError::Transient(format!("HTTP {}", status)))
        } else {
            Err(StorageError::Permanent(format!("HTTP {}", status)))
        }
    }

    fn signed_url(&self, bucket: &str, path: &str, ttl: Duration) -> Result<String, StorageError> {
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let token = self.sign(bucket, path, expires);
        Ok(format!(
            "{}?expires={}&token={}",
            self.object_url(bucket, path),
            expires,
            token
        ))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.object_url(bucket, path)
    }
}

// ============================================================================
// In-memory implementation (tests, local development)
// ============================================================================

/// In-memory storage with failure injection
pub struct MemoryStorage {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    /// Number of upcoming fetches that fail transiently (then drains)
    transient_failures: Mutex<u32>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            transient_failures: Mutex::new(0),
        }
    }

    pub async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .await
            .insert((bucket.to_string(), path.to_string()), bytes);
    }

    /// Make the next `count` fetches fail transiently
    pub async fn inject_transient_failures(&self, count: u32) {
        *self.transient_failures.lock().await = count;
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryStorage {
    async fn fetch_bytes(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError> {
        {
            let mut failures = self.transient_failures.lock().await;
            if *failures > 0 {
                *failures -= 1;
                return Err(StorageError::Transient("injected failure".to_string()));
            }
        }
        self.objects
            .lock()
            .await
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            })
    }

    fn signed_url(&self, bucket: &str, path: &str, _ttl: Duration) -> Result<String, StorageError> {
        Ok(format!("memory://{}/{}?signed=1", bucket, path))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{}/{}", bucket, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_bucket_classification() {
        assert!(is_private_bucket("kyc-docs"));
        assert!(is_private_bucket("agency"));
        assert!(!is_private_bucket("users"));
    }

    #[tokio::test]
    async fn test_resolver_signs_private_buckets() {
        let storage = MemoryStorage::new();
        let url = resolve_url(&storage, "kyc-docs", "user_1/kyc/id_front.jpg", Duration::from_secs(60))
            .unwrap();
        assert!(url.contains("signed=1"));

        let url = resolve_url(&storage, "users", "avatar.jpg", Duration::from_secs(60)).unwrap();
        assert!(!url.contains("signed=1"));
    }

    #[tokio::test]
    async fn test_memory_fetch_and_not_found() {
        let storage = MemoryStorage::new();
        storage.put("kyc-docs", "a/b.jpg", vec![1, 2, 3]).await;

        let bytes = storage.fetch_bytes("kyc-docs", "a/b.jpg").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);

        let missing = storage.fetch_bytes("kyc-docs", "missing.jpg").await;
        assert!(matches!(missing, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let storage = MemoryStorage::new();
        storage.put("kyc-docs", "doc.jpg", vec![7]).await;
        storage.inject_transient_failures(2).await;

        let bytes = fetch_with_retry(&storage, "kyc-docs", "doc.jpg").await.unwrap();
        assert_eq!(bytes, vec![7]);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_schedule() {
        let storage = MemoryStorage::new();
        storage.put("kyc-docs", "doc.jpg", vec![7]).await;
        // More failures than the schedule allows (1 initial + 3 retries)
        storage.inject_transient_failures(10).await;

        let result = fetch_with_retry(&storage, "kyc-docs", "doc.jpg").await;
        assert!(matches!(result, Err(StorageError::Transient(_))));
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_not_found() {
        let storage = MemoryStorage::new();
        let start = std::time::Instant::now();
        let result = fetch_with_retry(&storage, "kyc-docs", "missing.jpg").await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
        // No backoff sleeps happened
        assert!(start.elapsed() < Duration::from_millis(90));
    }

    #[test]
    fn test_http_signed_url_shape() {
        let storage = HttpObjectStorage::new(
            "http://storage.local/".to_string(),
            "secret".to_string(),
        )
        .unwrap();
        let url = storage
            .signed_url("kyc-docs", "user_9/kyc/id_front_1700000000.jpg", Duration::from_secs(900))
            .unwrap();

        assert!(url.starts_with("http://storage.local/kyc-docs/user_9/kyc/id_front_1700000000.jpg?expires="));
        assert!(url.contains("&token="));
    }

    #[test]
    fn test_object_path_convention() {
        let owner = uuid::Uuid::nil();
        let path = kyc_object_path("user", owner, "ID_FRONT", 1_700_000_000, "jpg");
        assert_eq!(
            path,
            format!("user_{}/kyc/id_front_1700000000.jpg", owner)
        );

        let agency_path = kyc_object_path("agency", owner, "BUSINESS_PERMIT", 1_700_000_000, "png");
        assert!(agency_path.starts_with("agency_"));
        assert!(agency_path.contains("/kyc/business_permit_"));
    }

    #[test]
    fn test_http_signature_varies_with_path() {
        let storage =
            HttpObjectStorage::new("http://s".to_string(), "secret".to_string()).unwrap();
        let a = storage.sign("kyc-docs", "a.jpg", 1000);
        let b = storage.sign("kyc-docs", "b.jpg", 1000);
        assert_ne!(a, b);
    }
}
