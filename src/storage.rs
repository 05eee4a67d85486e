use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::primitives::ByteStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::StorageError;

// 1. StorageService Contract
/// StorageService
///
/// The object-store half of the backend-as-a-service. Handlers and the catalog only see this
/// trait, so the S3 client and the in-memory mock are interchangeable.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the configured bucket if missing. Used by local runs against MinIO.
    async fn ensure_bucket_exists(&self);

    /// Stores `bytes` under `key` and returns the object's public URL.
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

// 2. The Real Implementation (S3/MinIO/Supabase)
/// S3StorageClient
///
/// Talks to any S3-compatible endpoint: MinIO locally, Supabase Storage in production.
/// Path-style addressing is required by both.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
    public_base_url: String,
}

impl S3StorageClient {
    /// new
    ///
    /// `public_base_url` is the prefix under which objects of the bucket are publicly readable,
    /// without the bucket name.
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        public_base_url: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket_name, key)
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    async fn ensure_bucket_exists(&self) {
        // CreateBucket on an existing bucket fails harmlessly.
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            debug!(bucket = %self.bucket_name, error = %e, "create_bucket skipped");
        }
    }

    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = sanitize_key(key)?;
        let size = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "object upload failed");
                StorageError::Upload {
                    key: key.clone(),
                    message: e.to_string(),
                }
            })?;

        debug!(key = %key, size, "object uploaded");
        Ok(self.public_url(&key))
    }
}

/// sanitize_key
///
/// Strips directory navigation (`..`, `.`) and empty segments from a key. A key with nothing
/// left is rejected.
pub fn sanitize_key(key: &str) -> Result<String, StorageError> {
    let sanitized = key
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");

    if sanitized.is_empty() {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(sanitized)
}

/// object_key_for
///
/// Storage key for a poster uploaded by `owner_id`: `titles/{owner}/{random}.{ext}`. Only the
/// extension of the client's file name survives.
pub fn object_key_for(owner_id: Uuid, file_name: &str) -> String {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase());

    match extension {
        Some(ext) => format!("titles/{}/{}.{}", owner_id, Uuid::new_v4(), ext),
        None => format!("titles/{}/{}", owner_id, Uuid::new_v4()),
    }
}

// 3. The Mock Implementation (For Tests and Local Runs)
/// StoredObject
///
/// What `MockStorageService` records per upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub content_type: String,
    pub size: usize,
}

/// MockStorageService
///
/// Records uploads in memory and hands back deterministic local URLs.
#[derive(Default)]
pub struct MockStorageService {
    /// When true, every upload fails.
    pub should_fail: bool,
    uploads: Mutex<Vec<StoredObject>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Uploads received so far, oldest first.
    pub fn uploads(&self) -> Vec<StoredObject> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = sanitize_key(key)?;
        if self.should_fail {
            return Err(StorageError::Upload {
                key,
                message: "mock storage failure".into(),
            });
        }

        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StoredObject {
                key: key.clone(),
                content_type: content_type.to_string(),
                size: bytes.len(),
            });

        Ok(format!("http://localhost:9000/mock-bucket/{}", key))
    }
}

/// StorageState
///
/// The shared handle to the storage service.
pub type StorageState = Arc<dyn StorageService>;
