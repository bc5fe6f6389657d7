//! Streaming SHA-256 hashing.
//!
//! Full-file digests stream through a fixed 1 MiB buffer so large audio
//! files never load into memory at once; each read is an await point, which
//! keeps long hashes from starving the peer tasks sharing the runtime.

use crate::error::{FileError, Result};
use crate::HASH_BUFFER_SIZE;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// SHA-256 of a byte slice.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of an entire file, streamed in [`HASH_BUFFER_SIZE`] reads.
///
/// # Errors
///
/// Returns `FileError::NotFound` if the file cannot be opened, or an IO
/// error from the reads.
pub async fn hash_file(path: &Path) -> Result<[u8; 32]> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|_| FileError::NotFound(path.to_path_buf()))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
