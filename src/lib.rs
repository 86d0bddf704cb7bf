//! Multipart Uploadr Library
//!
//! Adaptive upload engine for object storage backends.
//!
//! # Features
//!
//! - **Smart Upload**: single request below the threshold, concurrent
//!   multipart above it
//! - **Bounded Concurrency**: parts stream from independent file ranges
//!   through a fixed-size worker pool
//! - **All-or-Nothing**: a failed part aborts the whole session
//! - **Resumable**: checkpoint-driven uploads continue where they stopped
//! - **Pluggable Backends**: anything implementing [`StorageProvider`]
//!
//! # Example
//!
//! ```no_run
//! use multipart_uploadr::{LocalFsProvider, UploadRequest, Uploader};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = Arc::new(LocalFsProvider::new("/srv/objects", "http://localhost:8080"));
//!     let uploader = Uploader::new(provider);
//!
//!     let request = UploadRequest::from_file("backup.tar").with_destination("nightly");
//!     let result = uploader.smart_upload(request).await?;
//!     println!("{} -> {:?}", result.object_key, result.download_url);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod metrics;
pub mod provider;
pub mod telemetry;
pub mod upload;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointStore, JsonFileStore};
pub use config::Config;
pub use provider::{LocalFsProvider, StorageProvider};
pub use upload::{
    ObjectKey, UploadError, UploadOptions, UploadRequest, UploadResult, Uploader, Visibility,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
