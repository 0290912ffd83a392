//! Random-access byte sources for uploads

use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// A payload that can be read by explicit (offset, length)
///
/// Reads never depend on a shared cursor, so concurrent workers can read
/// disjoint ranges of the same source.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total size in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `length` bytes starting at `offset`
    async fn read_range(&self, offset: u64, length: u64) -> io::Result<Bytes>;

    /// Read the whole payload
    async fn read_all(&self) -> io::Result<Bytes> {
        self.read_range(0, self.len()).await
    }
}

/// File on local disk; every read opens its own handle
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Open a file and record its current size
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;

        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }

        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, offset: u64, length: u64) -> io::Result<Bytes> {
        check_range(self.len, offset, length)?;

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }
}

#[async_trait]
impl ByteSource for Bytes {
    fn len(&self) -> u64 {
        Bytes::len(self) as u64
    }

    async fn read_range(&self, offset: u64, length: u64) -> io::Result<Bytes> {
        check_range(Bytes::len(self) as u64, offset, length)?;
        Ok(self.slice(offset as usize..(offset + length) as usize))
    }
}

fn check_range(size: u64, offset: u64, length: u64) -> io::Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "range {}+{} is outside a source of {} bytes",
                offset, length, size
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_source_reads_by_offset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789abcdef").unwrap();

        let source = FileSource::open(file.path()).await.unwrap();
        assert_eq!(source.len(), 16);

        // Out of order reads must not interfere with each other
        let tail = source.read_range(10, 6).await.unwrap();
        let head = source.read_range(0, 4).await.unwrap();

        assert_eq!(&tail[..], b"abcdef");
        assert_eq!(&head[..], b"0123");
    }

    #[tokio::test]
    async fn test_file_source_rejects_range_past_end() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"short").unwrap();

        let source = FileSource::open(file.path()).await.unwrap();
        let err = source.read_range(3, 10).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_file_source_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::open(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_bytes_source() {
        let source = Bytes::from_static(b"hello world");
        assert_eq!(ByteSource::len(&source), 11);
        assert_eq!(&source.read_range(6, 5).await.unwrap()[..], b"world");
        assert_eq!(&source.read_all().await.unwrap()[..], b"hello world");
        assert!(source.read_range(6, 6).await.is_err());
    }
}
