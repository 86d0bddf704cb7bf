//! Upload module
//!
//! Request/result types for the upload engine plus the pieces it is built
//! from: partition strategy, range reader, worker pool and the orchestrator
//! that ties them together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::provider::{BoxedReader, ObjectAttributes, ProviderError};

pub mod orchestrator;
pub mod partition;
pub mod range_reader;
pub mod spool;
pub mod worker_pool;

pub use orchestrator::{UploadOptions, Uploader};
pub use partition::{PartRange, PartitionError, PartitionPlan};
pub use range_reader::RangeReader;

/// Content type used when the request does not carry one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid upload request: {0}")]
    Validation(String),

    #[error("Invalid partition configuration: {0}")]
    Partition(#[from] PartitionError),

    #[error("Provider error during {operation}: {source}")]
    Provider {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Missing parts before completion: expected {expected}, missing {missing:?}")]
    IncompleteParts { expected: u32, missing: Vec<u32> },

    #[error("Part upload task panicked: {0}")]
    TaskPanicked(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl UploadError {
    /// Wrap a backend error with the adapter operation that produced it
    pub fn provider(operation: &'static str, source: ProviderError) -> Self {
        Self::Provider { operation, source }
    }

    /// Errors raised before any backend call is made
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Errors caused by unsatisfiable sizing constraints
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Partition(_))
    }
}

/// Object visibility on the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

/// Resolved backend path of an object (prefix + name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Join a destination prefix and an object name into a key.
    ///
    /// Leading/trailing slashes are normalized; empty names and `.`/`..`
    /// segments are rejected.
    pub fn resolve(prefix: &str, name: &str) -> Result<Self, UploadError> {
        let name = name.trim_matches('/');
        if name.is_empty() {
            return Err(UploadError::Validation("object name is empty".into()));
        }

        let prefix = prefix.trim_matches('/');
        let key = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };

        if key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(UploadError::Validation(format!(
                "object key '{}' contains an empty or relative segment",
                key
            )));
        }

        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the bytes of an upload come from
pub enum UploadSource {
    /// Regular file on the local filesystem
    File(PathBuf),
    /// Arbitrary byte stream; spooled to disk when it has to be chunked
    Stream(BoxedReader),
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A single upload request
#[derive(Debug)]
pub struct UploadRequest {
    pub source: UploadSource,
    /// Destination prefix on the backend
    pub destination: String,
    /// Target object name; defaults to the source file name
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    /// Known size in bytes; probed from the source when absent
    pub size: Option<u64>,
    pub visibility: Visibility,
    pub metadata: HashMap<String, String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UploadRequest {
    /// Upload a local file
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::with_source(UploadSource::File(path.into()))
    }

    /// Upload a byte stream under the given object name
    pub fn from_stream(reader: BoxedReader, file_name: impl Into<String>) -> Self {
        let mut request = Self::with_source(UploadSource::Stream(reader));
        request.file_name = Some(file_name.into());
        request
    }

    fn with_source(source: UploadSource) -> Self {
        Self {
            source,
            destination: String::new(),
            file_name: None,
            content_type: None,
            size: None,
            visibility: Visibility::default(),
            metadata: HashMap::new(),
            expires_at: None,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Path of a file source, `None` for streams
    pub fn source_path(&self) -> Option<&Path> {
        match &self.source {
            UploadSource::File(path) => Some(path),
            UploadSource::Stream(_) => None,
        }
    }

    /// Resolve the backend key for this request
    pub fn object_key(&self) -> Result<ObjectKey, UploadError> {
        let name = match (&self.file_name, &self.source) {
            (Some(name), _) => name.clone(),
            (None, UploadSource::File(path)) => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    UploadError::Validation(format!(
                        "cannot derive object name from {}",
                        path.display()
                    ))
                })?,
            (None, UploadSource::Stream(_)) => {
                return Err(UploadError::Validation(
                    "stream uploads require a file name".into(),
                ))
            }
        };
        ObjectKey::resolve(&self.destination, &name)
    }

    /// Attributes handed to the provider alongside the bytes
    pub fn attributes(&self) -> ObjectAttributes {
        ObjectAttributes {
            content_type: self
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            visibility: self.visibility,
            metadata: self.metadata.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Check that a file source exists and is a regular file, returning its size
pub(crate) async fn probe_file(path: &Path) -> Result<u64, UploadError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        UploadError::Validation(format!("source {} is not readable: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(UploadError::Validation(format!(
            "source {} is not a regular file",
            path.display()
        )));
    }
    Ok(metadata.len())
}

/// Terminal outcome of an upload
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub success: bool,
    pub download_url: Option<String>,
    pub object_key: ObjectKey,
    pub upload_id: Option<String>,
    pub etag: Option<String>,
    pub file_size: u64,
    pub completed_at: DateTime<Utc>,
    pub message: String,
    cause: Option<Arc<UploadError>>,
}

impl UploadResult {
    /// Successful upload
    pub fn succeeded(
        object_key: ObjectKey,
        file_size: u64,
        etag: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            download_url: Some(download_url.into()),
            object_key,
            upload_id: None,
            etag: Some(etag.into()),
            file_size,
            completed_at: Utc::now(),
            message: "upload completed".to_string(),
            cause: None,
        }
    }

    /// Failed upload wrapping the original cause
    pub fn failed(object_key: ObjectKey, file_size: u64, cause: UploadError) -> Self {
        Self {
            success: false,
            download_url: None,
            object_key,
            upload_id: None,
            etag: None,
            file_size,
            completed_at: Utc::now(),
            message: cause.to_string(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn with_upload_id(mut self, upload_id: impl Into<String>) -> Self {
        self.upload_id = Some(upload_id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The error that made this upload fail
    pub fn error(&self) -> Option<&UploadError> {
        self.cause.as_deref()
    }
}
