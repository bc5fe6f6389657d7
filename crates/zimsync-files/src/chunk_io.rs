//! Seek-based chunk reading and writing.
//!
//! Both halves of a transfer address the file by `(chunk_index, chunk_size)`
//! with `offset = chunk_index * chunk_size`. The reader serves chunks in any
//! order for retransmission; the writer accepts chunks in any order because
//! datagrams arrive unordered.

use crate::error::{FileError, Result};
use crate::chunk_count;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Reads fixed-size chunks of a file by index.
#[derive(Debug)]
pub struct ChunkReader {
    file: File,
    total_size: u64,
    chunk_size: u32,
}

impl ChunkReader {
    /// Open `path` for chunked reading.
    ///
    /// # Errors
    ///
    /// Returns `FileError::NotFound` if the file cannot be opened.
    pub async fn open(path: &Path, chunk_size: u32) -> Result<Self> {
        debug_assert!(chunk_size > 0);
        let file = File::open(path)
            .await
            .map_err(|_| FileError::NotFound(path.to_path_buf()))?;
        let total_size = file.metadata().await?.len();
        Ok(Self {
            file,
            total_size,
            chunk_size,
        })
    }

    /// Total file size in bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of chunks covering the file.
    #[must_use]
    pub fn total_chunks(&self) -> u32 {
        chunk_count(self.total_size, self.chunk_size)
    }

    /// Read the chunk at `index`, or `None` past end of file.
    ///
    /// Every chunk is `chunk_size` bytes except the last, which carries the
    /// remainder.
    ///
    /// # Errors
    ///
    /// Returns an IO error from seek or read.
    pub async fn read_chunk(&mut self, index: u32) -> Result<Option<Vec<u8>>> {
        let offset = u64::from(index) * u64::from(self.chunk_size);
        if offset >= self.total_size {
            return Ok(None);
        }

        let len = u64::from(self.chunk_size).min(self.total_size - offset) as usize;
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }
}

/// Writes chunks of an incoming file by offset.
///
/// Creates the parent directory if missing and truncates any existing file
/// at the target path. [`ChunkWriter::discard`] removes the partial file
/// when a transfer fails validation.
#[derive(Debug)]
pub struct ChunkWriter {
    file: File,
    path: PathBuf,
}

impl ChunkWriter {
    /// Create (or truncate) the target file for chunked writing.
    ///
    /// # Errors
    ///
    /// Returns an IO error from directory creation or open.
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Target path of the file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an IO error from seek or write.
    pub async fn write_chunk(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    /// Flush and close the file.
    ///
    /// # Errors
    ///
    /// Returns an IO error from flush or sync.
    pub async fn finish(mut self) -> Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.path)
    }

    /// Close and delete the partial file.
    pub async fn discard(self) {
        let path = self.path.clone();
        drop(self);
        if let Err(err) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), %err, "failed to remove partial file");
        }
    }
}
