//! Spooling of stream sources to disk
//!
//! Multipart uploads need random access to the source, which a stream does
//! not offer. Streams that are too large (or of unknown size) for a
//! single-shot upload are written to a temp file first and uploaded from
//! there.
//!
//! # Example
//!
//! ```no_run
//! use multipart_uploadr::upload::spool::SpooledFile;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut source: &[u8] = b"Hello, World!";
//! let spooled = SpooledFile::from_reader(&mut source, None).await?;
//!
//! println!("File: {:?}", spooled.path());
//! println!("Size: {} bytes", spooled.size());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use super::UploadError;

/// Read buffer size used while spooling (64KB)
pub const SPOOL_BUFFER_SIZE: usize = 65536;

/// Stream contents written to a temp file
///
/// The file is removed when this value is dropped.
#[derive(Debug)]
pub struct SpooledFile {
    path: PathBuf,
    size: u64,
}

impl SpooledFile {
    /// Drain `reader` into a new temp file under `dir` (system temp dir when
    /// `None`).
    pub async fn from_reader<R>(reader: &mut R, dir: Option<&Path>) -> Result<Self, UploadError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("uploadr-{}.spool", uuid::Uuid::new_v4()));
        // Owns the path from here on so a failed spool cleans up after itself
        let mut spooled = Self {
            path,
            size: 0,
        };

        let mut file = tokio::fs::File::create(&spooled.path).await?;
        let mut buffer = vec![0u8; SPOOL_BUFFER_SIZE];

        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n]).await?;
            spooled.size += n as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        tracing::debug!(
            path = %spooled.path.display(),
            bytes = spooled.size,
            "Spooled stream to disk"
        );

        Ok(spooled)
    }

    /// Get the path to the spooled file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the size of the file in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for SpooledFile {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to clean up spool file"
                );
            }
        }
    }
}
