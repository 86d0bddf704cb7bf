//! Storage provider capability interface
//!
//! Every storage backend implements [`StorageProvider`]. The upload engine is
//! written against this trait only and never sees a backend's own error
//! taxonomy: implementations report failures as [`ProviderError`].
//!
//! | Operation | Used by |
//! |-----------|---------|
//! | `standard_upload` | single-shot path |
//! | `initiate_multipart_upload` | concurrent and resumable paths |
//! | `upload_part` | part tasks |
//! | `complete_multipart_upload` / `abort_multipart_upload` | session teardown |
//! | `list_uploaded_parts` | checkpoint reconciliation on resume |
//! | `download` / `delete` / `get_metadata` / `generate_presigned_url` | pass-through helpers |

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::upload::partition::{
    PartitionLimits, DEFAULT_MAX_PART_SIZE, DEFAULT_MIN_PART_SIZE, DEFAULT_PART_COUNT_LIMIT,
};
use crate::upload::{ObjectKey, RangeReader, UploadResult, Visibility};

pub mod local;

pub use local::LocalFsProvider;

/// Default single-shot/multipart cut-over (8MB)
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Owned async byte source
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Unknown multipart upload: {0}")]
    NoSuchUpload(String),

    #[error("Invalid part {part_number}: {reason}")]
    InvalidPart { part_number: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ProviderError {
    /// Backend failure without an underlying cause
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Backend failure wrapping the backend's own error
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Limits a backend imposes on uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLimits {
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub part_count_limit: u32,
    /// Files at or above this size go through multipart upload
    pub multipart_threshold: u64,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            min_part_size: DEFAULT_MIN_PART_SIZE,
            max_part_size: DEFAULT_MAX_PART_SIZE,
            part_count_limit: DEFAULT_PART_COUNT_LIMIT,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
        }
    }
}

impl From<ProviderLimits> for PartitionLimits {
    fn from(limits: ProviderLimits) -> Self {
        Self {
            min_part_size: limits.min_part_size,
            max_part_size: limits.max_part_size,
            part_count_limit: limits.part_count_limit,
        }
    }
}

/// Attributes stored with an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    pub content_type: String,
    pub visibility: Visibility,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Body of a single-shot upload
pub struct ObjectBody {
    reader: BoxedReader,
    length: u64,
}

impl ObjectBody {
    pub fn new(reader: BoxedReader, length: u64) -> Self {
        Self { reader, length }
    }

    /// Whole-file body backed by a range reader
    pub fn from_range(reader: RangeReader) -> Self {
        let length = reader.length();
        Self::new(Box::pin(reader), length)
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn into_reader(self) -> BoxedReader {
        self.reader
    }
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Handle of an open multipart session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub object_key: ObjectKey,
    pub upload_id: String,
}

/// A part stored by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPart {
    /// 1-based part number
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Result of finishing a multipart session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub etag: String,
    pub download_url: String,
}

/// Stored object description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: ObjectKey,
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub attributes: ObjectAttributes,
}

/// Backend capability interface
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageProvider: Send + Sync + 'static {
    /// Short backend name, recorded in checkpoints
    fn name(&self) -> &'static str;

    /// Size limits of this backend
    fn limits(&self) -> ProviderLimits {
        ProviderLimits::default()
    }

    /// Whether multipart sessions survive process restarts
    fn supports_resumable_upload(&self) -> bool;

    /// Upload an object in one request
    async fn standard_upload(
        &self,
        key: &ObjectKey,
        body: ObjectBody,
        attributes: &ObjectAttributes,
    ) -> Result<UploadResult, ProviderError>;

    /// Open a multipart session
    async fn initiate_multipart_upload(
        &self,
        key: &ObjectKey,
        attributes: &ObjectAttributes,
    ) -> Result<UploadSession, ProviderError>;

    /// Upload one part of a session
    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        body: RangeReader,
        length: u64,
    ) -> Result<UploadedPart, ProviderError>;

    /// Assemble the object from `parts` (part number -> etag)
    async fn complete_multipart_upload(
        &self,
        session: &UploadSession,
        parts: &BTreeMap<u32, String>,
    ) -> Result<CompletedUpload, ProviderError>;

    /// Discard a session and its parts
    async fn abort_multipart_upload(&self, session: &UploadSession) -> Result<(), ProviderError>;

    /// Parts the backend currently holds for a session
    async fn list_uploaded_parts(
        &self,
        session: &UploadSession,
    ) -> Result<Vec<UploadedPart>, ProviderError>;

    async fn download(&self, key: &ObjectKey) -> Result<Bytes, ProviderError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), ProviderError>;

    async fn get_metadata(&self, key: &ObjectKey) -> Result<ObjectMetadata, ProviderError>;

    async fn generate_presigned_url(
        &self,
        key: &ObjectKey,
        expires_in: Duration,
    ) -> Result<String, ProviderError>;
}
