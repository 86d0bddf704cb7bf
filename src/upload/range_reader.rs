//! Bounded read-only view over a byte range of a file
//!
//! Every reader owns its own file handle positioned at the range start, so
//! any number of workers can read disjoint parts of the same file at once.
//! A reader never yields more than its range length, even if the file is
//! larger or grows while it is read, and fails with `UnexpectedEof` if the
//! file turns out to be shorter than the range.

use bytes::Bytes;
use pin_project_lite::pin_project;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, ReadBuf, Take};

pin_project! {
    /// Reader over `[offset, offset + length)` of a file
    #[derive(Debug)]
    pub struct RangeReader {
        #[pin]
        inner: Take<File>,
        offset: u64,
        length: u64,
        consumed: u64,
    }
}

impl RangeReader {
    /// Open `path` and position a new handle at `offset`
    pub async fn open(path: impl AsRef<Path>, offset: u64, length: u64) -> io::Result<Self> {
        let mut file = File::open(path.as_ref()).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        Ok(Self {
            inner: file.take(length),
            offset,
            length,
            consumed: 0,
        })
    }

    /// Offset of the range in the file
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes this reader yields in total
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> u64 {
        self.length - self.consumed
    }

    /// Read the whole range into memory
    pub async fn read_to_bytes(mut self) -> io::Result<Bytes> {
        let capacity = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        let mut buffer = Vec::with_capacity(capacity);
        self.read_to_end(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

impl AsyncRead for RangeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let wanted = buf.remaining();
        let before = buf.filled().len();

        ready!(this.inner.poll_read(cx, buf))?;

        let read = (buf.filled().len() - before) as u64;
        if read == 0 && wanted > 0 && *this.consumed < *this.length {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "file ended {} bytes into a {} byte range at offset {}",
                    this.consumed, this.length, this.offset
                ),
            )));
        }

        *this.consumed += read;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_file(len: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_reads_exact_range() {
        let file = sample_file(1000);
        let reader = RangeReader::open(file.path(), 100, 50).await.unwrap();
        assert_eq!(reader.offset(), 100);
        assert_eq!(reader.length(), 50);

        let bytes = reader.read_to_bytes().await.unwrap();
        let expected: Vec<u8> = (100..150).map(|i| (i % 251) as u8).collect();
        assert_eq!(&bytes[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_never_reads_past_length() {
        let file = sample_file(1000);
        let mut reader = RangeReader::open(file.path(), 0, 10).await.unwrap();

        let mut buffer = vec![0u8; 64];
        let mut total = 0;
        loop {
            let n = reader.read(&mut buffer[total..]).await.unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 10);
        assert_eq!(reader.remaining(), 0);
    }

    #[tokio::test]
    async fn test_short_file_is_an_error() {
        let file = sample_file(100);
        let reader = RangeReader::open(file.path(), 90, 20).await.unwrap();
        let err = reader.read_to_bytes().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_independent_concurrent_readers() {
        let file = sample_file(64 * 1024);
        let path = file.path().to_path_buf();

        let mut handles = Vec::new();
        for part in 0..8u64 {
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                let reader = RangeReader::open(&path, part * 8192, 8192).await.unwrap();
                (part, reader.read_to_bytes().await.unwrap())
            }));
        }

        for handle in handles {
            let (part, bytes) = handle.await.unwrap();
            assert_eq!(bytes.len(), 8192);
            let start = (part * 8192) as usize;
            assert_eq!(bytes[0], (start % 251) as u8);
            assert_eq!(bytes[8191], ((start + 8191) % 251) as u8);
        }
    }

    #[tokio::test]
    async fn test_dropping_one_reader_leaves_others_intact() {
        let file = sample_file(200);
        let first = RangeReader::open(file.path(), 0, 100).await.unwrap();
        let second = RangeReader::open(file.path(), 100, 100).await.unwrap();
        drop(first);

        let bytes = second.read_to_bytes().await.unwrap();
        assert_eq!(bytes.len(), 100);
        assert_eq!(bytes[0], 100);
    }
}
