//! # ZimSync Files
//!
//! File-level primitives for the ZimSync protocol:
//! - File metadata with full-content SHA-256 checksums
//! - Streaming hashing with a fixed read buffer
//! - Shared-directory catalog enumeration
//! - Seek-based chunk reading and writing
//!
//! The transfer and session engines in `zimsync-core` build on these
//! primitives; nothing in this crate knows about packets or peers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod chunk_io;
pub mod error;
pub mod hasher;
pub mod metadata;

pub use catalog::{Catalog, CatalogEntry};
pub use chunk_io::{ChunkReader, ChunkWriter};
pub use error::FileError;
pub use hasher::{hash_bytes, hash_file};
pub use metadata::{validate_basename, AudioMetadata, FileMetadata};

/// Default transfer chunk size (32 KiB). Chunks must fit a single datagram
/// after framing and textual encoding, which caps usable sizes well below
/// the 64 KiB datagram bound.
pub const DEFAULT_CHUNK_SIZE: u32 = 32 * 1024;

/// Read buffer size for streaming full-file hashing (1 MiB).
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Number of chunks needed to cover `total_size` bytes at `chunk_size`.
///
/// A zero-byte file has zero chunks.
#[must_use]
pub fn chunk_count(total_size: u64, chunk_size: u32) -> u32 {
    debug_assert!(chunk_size > 0);
    total_size.div_ceil(u64::from(chunk_size)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_exact_multiple() {
        assert_eq!(chunk_count(65536, 32768), 2);
    }

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(100_000, 32768), 4);
        assert_eq!(chunk_count(1, 32768), 1);
        assert_eq!(chunk_count(32769, 32768), 2);
    }

    #[test]
    fn chunk_count_empty_file() {
        assert_eq!(chunk_count(0, 32768), 0);
    }
}
