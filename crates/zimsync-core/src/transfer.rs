//! Per-file transfer sessions.
//!
//! A transfer session tracks one file moving in one direction: the sender
//! side serves chunks by index with content-aware compression; the receiver
//! side writes chunks at their offsets, tracks which indices have arrived,
//! and verifies the full-file hash on completion. Sessions are owned by one
//! peer conversation and keyed by the offered file ID.

use crate::codec;
use crate::error::{Result, SyncError};
use crate::packet::{CompressionType, FileDataPayload};
use crate::MAX_CHUNK_SIZE;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;
use zimsync_files::{chunk_count, hash_file, ChunkReader, ChunkWriter, FileMetadata};

/// Which way a session moves bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    /// We read the file and serve chunks.
    Sending,
    /// We write chunks into a local file.
    Receiving,
}

#[derive(Debug)]
enum SessionIo {
    Sending(ChunkReader),
    Receiving(ChunkWriter),
}

/// State of one in-flight file transfer.
#[derive(Debug)]
pub struct TransferSession {
    metadata: FileMetadata,
    chunk_size: u32,
    direction: TransferDirection,
    io: SessionIo,
    /// Chunk indices stored locally (receiver).
    received_chunks: HashSet<u32>,
    /// Chunk indices the peer has confirmed (sender).
    acked_chunks: HashSet<u32>,
    started_at: Instant,
    transferred_bytes: u64,
}

impl TransferSession {
    /// Offered file handle this session serves.
    #[must_use]
    pub fn file_id(&self) -> Uuid {
        self.metadata.id
    }

    /// Metadata of the file in flight.
    #[must_use]
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    /// Transfer direction.
    #[must_use]
    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// Chunk size fixed for the life of the session.
    #[must_use]
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Number of chunks covering the file.
    #[must_use]
    pub fn total_chunks(&self) -> u32 {
        chunk_count(self.metadata.size, self.chunk_size)
    }

    /// Chunk indices not yet stored, in ascending order. Receiver side;
    /// drives selective retransmission.
    #[must_use]
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks())
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }

    /// Packed receipt bitmap over this session's chunks.
    #[must_use]
    pub fn received_bitmap(&self) -> Vec<u8> {
        chunk_bitmap(&self.received_chunks, self.total_chunks())
    }

    /// Chunk indices the peer has not yet confirmed, ascending. Sender
    /// side; drives retransmission.
    #[must_use]
    pub fn unacked_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks())
            .filter(|i| !self.acked_chunks.contains(i))
            .collect()
    }

    /// Completion fraction in `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        let total = self.total_chunks();
        if total == 0 {
            return 1.0;
        }
        let done = match self.direction {
            TransferDirection::Sending => self.acked_chunks.len(),
            TransferDirection::Receiving => self.received_chunks.len(),
        };
        done as f64 / f64::from(total)
    }

    /// Time since the session was created.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Raw bytes moved so far.
    #[must_use]
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }
}

/// Registry of the transfer sessions owned by one peer conversation.
///
/// At most one live session per (file ID, direction).
#[derive(Debug, Default)]
pub struct TransferEngine {
    sending: HashMap<Uuid, TransferSession>,
    receiving: HashMap<Uuid, TransferSession>,
}

impl TransferEngine {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stat and hash a local file, producing the metadata under which it
    /// will be offered. Assigns the file a fresh UUID handle.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the path does not name a regular file.
    pub async fn prepare_file_for_transfer(path: &Path) -> Result<FileMetadata> {
        Ok(FileMetadata::from_path(path).await?)
    }

    /// Open `path` for reading and register a sending session under
    /// `metadata.id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacket` for an unusable chunk size or a duplicate
    /// session, `FileNotFound` if the file cannot be opened.
    pub async fn start_sending(
        &mut self,
        metadata: FileMetadata,
        path: &Path,
        chunk_size: u32,
    ) -> Result<()> {
        validate_chunk_size(chunk_size)?;
        if self.sending.contains_key(&metadata.id) {
            return Err(SyncError::InvalidPacket(format!(
                "send session for {} already active",
                metadata.id
            )));
        }

        let reader = ChunkReader::open(path, chunk_size).await?;
        tracing::debug!(
            file = %metadata.path,
            id = %metadata.id,
            chunks = chunk_count(metadata.size, chunk_size),
            "send session started"
        );
        self.sending.insert(
            metadata.id,
            TransferSession {
                metadata,
                chunk_size,
                direction: TransferDirection::Sending,
                io: SessionIo::Sending(reader),
                received_chunks: HashSet::new(),
                acked_chunks: HashSet::new(),
                started_at: Instant::now(),
                transferred_bytes: 0,
            },
        );
        Ok(())
    }

    /// Create the target file and register a receiving session under
    /// `metadata.id`. The parent directory is created if missing and any
    /// existing file at `dest` is truncated.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacket` for an unusable chunk size or a duplicate
    /// session, or the underlying IO failure.
    pub async fn start_receiving(
        &mut self,
        metadata: FileMetadata,
        dest: &Path,
        chunk_size: u32,
    ) -> Result<()> {
        validate_chunk_size(chunk_size)?;
        if self.receiving.contains_key(&metadata.id) {
            return Err(SyncError::InvalidPacket(format!(
                "receive session for {} already active",
                metadata.id
            )));
        }

        let writer = ChunkWriter::create(dest).await?;
        tracing::debug!(
            file = %metadata.path,
            id = %metadata.id,
            dest = %dest.display(),
            "receive session started"
        );
        self.receiving.insert(
            metadata.id,
            TransferSession {
                metadata,
                chunk_size,
                direction: TransferDirection::Receiving,
                io: SessionIo::Receiving(writer),
                received_chunks: HashSet::new(),
                acked_chunks: HashSet::new(),
                started_at: Instant::now(),
                transferred_bytes: 0,
            },
        );
        Ok(())
    }

    /// Serve the chunk at `chunk_index` from the sending session for
    /// `file_id`, applying the audio-aware compression policy.
    ///
    /// Returns `None` once `chunk_index` points past end of file; that is
    /// the end-of-transfer sentinel, not an error.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` for an unknown session and IO/codec failures
    /// from the read or compression.
    pub async fn next_chunk(
        &mut self,
        file_id: Uuid,
        chunk_index: u32,
    ) -> Result<Option<FileDataPayload>> {
        let session = self
            .sending
            .get_mut(&file_id)
            .ok_or_else(|| SyncError::FileNotFound(file_id.to_string()))?;

        let SessionIo::Sending(reader) = &mut session.io else {
            unreachable!("sending map holds sending sessions");
        };

        let Some(raw) = reader.read_chunk(chunk_index).await? else {
            return Ok(None);
        };
        let raw_len = raw.len();

        let extension = session.metadata.extension();
        let (data, algorithm) = codec::compress_audio_chunk(&raw, extension.as_deref())?;
        let original_size = algorithm.map(|_| raw_len as i32);

        session.transferred_bytes += raw_len as u64;
        let offset = i64::from(chunk_index) * i64::from(session.chunk_size);

        tracing::trace!(
            id = %file_id,
            chunk = chunk_index,
            raw = raw_len,
            sent = data.len(),
            compressed = algorithm.is_some(),
            "serving chunk"
        );

        Ok(Some(FileDataPayload {
            file_id,
            chunk_index,
            offset,
            total_chunks: session.total_chunks(),
            data,
            original_size,
        }))
    }

    /// Store one received chunk: decompress when marked, verify the
    /// decompressed length, write at the packet offset, and record the
    /// index.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` for an unknown session, `ChecksumMismatch`
    /// when decompression fails or yields the wrong length, and
    /// `InvalidPacket` when the offset disagrees with the chunk index.
    pub async fn receive_chunk(&mut self, payload: &FileDataPayload) -> Result<()> {
        let session = self
            .receiving
            .get_mut(&payload.file_id)
            .ok_or_else(|| SyncError::FileNotFound(payload.file_id.to_string()))?;

        let expected_offset = i64::from(payload.chunk_index) * i64::from(session.chunk_size);
        if payload.offset != expected_offset || payload.offset < 0 {
            return Err(SyncError::InvalidPacket(format!(
                "chunk {} offset {} does not match chunk size {}",
                payload.chunk_index, payload.offset, session.chunk_size
            )));
        }

        let data = match payload.original_size {
            Some(original_size) => {
                let decompressed = codec::decompress(&payload.data, CompressionType::Zlib)
                    .map_err(|_| SyncError::ChecksumMismatch)?;
                if decompressed.len() != original_size as usize {
                    return Err(SyncError::ChecksumMismatch);
                }
                decompressed
            }
            None => payload.data.clone(),
        };

        let SessionIo::Receiving(writer) = &mut session.io else {
            unreachable!("receiving map holds receiving sessions");
        };
        writer.write_chunk(payload.offset as u64, &data).await?;

        session.received_chunks.insert(payload.chunk_index);
        session.transferred_bytes += data.len() as u64;

        tracing::trace!(
            id = %payload.file_id,
            chunk = payload.chunk_index,
            of = payload.total_chunks,
            "stored chunk"
        );
        Ok(())
    }

    /// Record a selective-ACK bitmap from the peer on the sending session
    /// for `file_id`. Bits outside the chunk range are ignored.
    pub fn record_ack(&mut self, file_id: Uuid, bitmap: Option<&[u8]>) {
        let Some(session) = self.sending.get_mut(&file_id) else {
            return;
        };
        if let Some(bitmap) = bitmap {
            for index in bitmap_to_chunks(bitmap, session.total_chunks()) {
                session.acked_chunks.insert(index);
            }
        }
    }

    /// Chunk indices the receiving session for `file_id` is still missing.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` for an unknown session.
    pub fn missing_chunks(&self, file_id: Uuid) -> Result<Vec<u32>> {
        self.receiving
            .get(&file_id)
            .map(TransferSession::missing_chunks)
            .ok_or_else(|| SyncError::FileNotFound(file_id.to_string()))
    }

    /// Handles of the live sending sessions.
    pub fn sending_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.sending.keys().copied()
    }

    /// Borrow a live session.
    #[must_use]
    pub fn session(&self, file_id: Uuid, direction: TransferDirection) -> Option<&TransferSession> {
        match direction {
            TransferDirection::Sending => self.sending.get(&file_id),
            TransferDirection::Receiving => self.receiving.get(&file_id),
        }
    }

    /// Whether a session exists for `file_id` in `direction`.
    #[must_use]
    pub fn contains(&self, file_id: Uuid, direction: TransferDirection) -> bool {
        self.session(file_id, direction).is_some()
    }

    /// Close the session for `file_id`.
    ///
    /// Sender side simply drops the read handle. Receiver side flushes the
    /// file, recomputes the full SHA-256, and compares it against the
    /// offered checksum; on mismatch the partial file is deleted and
    /// `ChecksumMismatch` is returned. On success returns the final path
    /// for receiving sessions.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` for an unknown session, `ChecksumMismatch`
    /// on hash mismatch, and IO failures from close or hashing.
    pub async fn complete_transfer(
        &mut self,
        file_id: Uuid,
        direction: TransferDirection,
    ) -> Result<Option<PathBuf>> {
        match direction {
            TransferDirection::Sending => {
                self.sending
                    .remove(&file_id)
                    .ok_or_else(|| SyncError::FileNotFound(file_id.to_string()))?;
                tracing::debug!(id = %file_id, "send session closed");
                Ok(None)
            }
            TransferDirection::Receiving => {
                let session = self
                    .receiving
                    .remove(&file_id)
                    .ok_or_else(|| SyncError::FileNotFound(file_id.to_string()))?;
                let elapsed = session.elapsed();
                let SessionIo::Receiving(writer) = session.io else {
                    unreachable!("receiving map holds receiving sessions");
                };
                let path = writer.finish().await?;

                let actual = hash_file(&path).await?;
                if actual != session.metadata.checksum {
                    tracing::warn!(
                        file = %session.metadata.path,
                        expected = %hex::encode(session.metadata.checksum),
                        actual = %hex::encode(actual),
                        "received file failed verification"
                    );
                    if let Err(err) = tokio::fs::remove_file(&path).await {
                        tracing::warn!(path = %path.display(), %err, "failed to remove corrupt file");
                    }
                    return Err(SyncError::ChecksumMismatch);
                }

                tracing::info!(
                    file = %session.metadata.path,
                    bytes = session.metadata.size,
                    elapsed = ?elapsed,
                    "transfer verified"
                );
                Ok(Some(path))
            }
        }
    }

    /// Drop every session. Receiving sessions discard their partial files;
    /// no partial file survives an aborted conversation.
    pub async fn abort_all(&mut self) {
        self.sending.clear();
        for (_, session) in self.receiving.drain() {
            if let SessionIo::Receiving(writer) = session.io {
                writer.discard().await;
            }
        }
    }
}

fn validate_chunk_size(chunk_size: u32) -> Result<()> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(SyncError::InvalidPacket(format!(
            "chunk size {chunk_size} outside (0, {MAX_CHUNK_SIZE}]"
        )));
    }
    Ok(())
}

/// Pack a set of chunk indices into the wire receipt bitmap: bit `k` lives
/// at byte `k / 8`, bit offset `k % 8`.
#[must_use]
pub fn chunk_bitmap(received: &HashSet<u32>, total_chunks: u32) -> Vec<u8> {
    let mut bitmap = vec![0u8; total_chunks.div_ceil(8) as usize];
    for &index in received {
        if index < total_chunks {
            bitmap[(index / 8) as usize] |= 1 << (index % 8);
        }
    }
    bitmap
}

/// Unpack a receipt bitmap into the chunk indices it marks, ascending.
#[must_use]
pub fn bitmap_to_chunks(bitmap: &[u8], total_chunks: u32) -> Vec<u32> {
    (0..total_chunks)
        .filter(|&index| {
            bitmap
                .get((index / 8) as usize)
                .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
        })
        .collect()
}
