//! Pull-model sync client.
//!
//! The client drives the conversation: discover a peer's catalog, then
//! request the chosen file chunk by chunk, acknowledging receipt with a
//! selective bitmap and re-requesting whatever went missing. Verification
//! against the offered checksum happens before the download is reported
//! complete.

use crate::codec;
use crate::device::DeviceInfo;
use crate::error::{Result, SyncError};
use crate::packet::{
    AckPayload, AnnouncePayload, DiscoverPayload, FileListPayload, FileRequestPayload, Packet,
    PacketFlags, PacketHeader,
};
use crate::transfer::{TransferDirection, TransferEngine, TransferSession};
use crate::DEFAULT_CHUNK_SIZE;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;
use zimsync_files::{chunk_count, validate_basename, FileMetadata};
use zimsync_transport::Connection;

/// Client tunables.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Chunk size requested from the peer.
    pub chunk_size: u32,
    /// How long to wait for any single response datagram.
    pub response_timeout: Duration,
    /// Full sweeps over the missing set before giving up a download.
    pub max_retransmit_passes: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            response_timeout: Duration::from_secs(5),
            max_retransmit_passes: 3,
        }
    }
}

/// One client conversation with a serving peer.
pub struct SyncClient<C: Connection> {
    conn: C,
    device: DeviceInfo,
    options: ClientOptions,
    sequence: u16,
    transfers: TransferEngine,
}

impl<C: Connection> SyncClient<C> {
    /// Client over an established connection.
    #[must_use]
    pub fn new(conn: C, device: DeviceInfo) -> Self {
        Self::with_options(conn, device, ClientOptions::default())
    }

    /// Client with explicit tunables.
    #[must_use]
    pub fn with_options(conn: C, device: DeviceInfo, options: ClientOptions) -> Self {
        Self {
            conn,
            device,
            options,
            sequence: 0,
            transfers: TransferEngine::new(),
        }
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &C {
        &self.conn
    }

    fn next_sequence(&mut self) -> u16 {
        let current = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        current
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let sequence = self.next_sequence();
        let datagram = codec::encode_packet_with_flags(packet, sequence, PacketFlags::empty())?;
        self.conn.send(&datagram).await.map_err(SyncError::from)
    }

    /// Receive and decode the next packet, bounded by the response timeout.
    async fn recv_packet(&mut self) -> Result<(PacketHeader, Packet)> {
        let datagram = tokio::time::timeout(self.options.response_timeout, self.conn.recv())
            .await
            .map_err(|_| SyncError::Timeout)?
            .map_err(SyncError::from)?;
        Ok(codec::decode_packet(&datagram)?)
    }

    /// Probe the peer: send a discover, expect the announcement and the
    /// shared-file catalog.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the peer stays silent, `PeerError` when it
    /// answers with a protocol error, and codec failures verbatim.
    pub async fn discover(&mut self) -> Result<(AnnouncePayload, FileListPayload)> {
        let discover = Packet::Discover(DiscoverPayload {
            device_id: self.device.id,
            timestamp: FileMetadata::now_unix(),
        });
        self.send_packet(&discover).await?;

        let mut announce: Option<AnnouncePayload> = None;
        loop {
            match self.recv_packet().await?.1 {
                Packet::Announce(payload) => announce = Some(payload),
                Packet::FileList(list) => {
                    let announce = announce.ok_or_else(|| {
                        SyncError::InvalidPacket("file list before announce".into())
                    })?;
                    tracing::info!(
                        peer = %announce.device_info.name,
                        files = list.files.len(),
                        "peer catalog received"
                    );
                    return Ok((announce, list));
                }
                Packet::Error(error) => {
                    return Err(SyncError::PeerError {
                        code: error.code,
                        message: error.message,
                    });
                }
                other => {
                    tracing::debug!(packet = ?other.packet_type(), "ignoring unexpected packet");
                }
            }
        }
    }

    /// Download one offered file into `dest_dir`, verifying the full-file
    /// checksum before reporting success. Returns the written path.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` from the peer for unknown handles,
    /// `ChecksumMismatch` when verification fails (the partial file is
    /// removed), and `Timeout` when retransmission passes are exhausted.
    pub async fn download(&mut self, metadata: &FileMetadata, dest_dir: &Path) -> Result<PathBuf> {
        validate_basename(&metadata.path)?;
        let dest = dest_dir.join(&metadata.path);
        let chunk_size = self.options.chunk_size;
        self.transfers
            .start_receiving(metadata.clone(), &dest, chunk_size)
            .await?;

        let total_chunks = chunk_count(metadata.size, chunk_size);
        tracing::info!(
            file = %metadata.path,
            bytes = metadata.size,
            chunks = total_chunks,
            "download started"
        );

        let result = self.pull_all_chunks(metadata, total_chunks).await;
        if let Err(err) = result {
            self.transfers.abort_all().await;
            return Err(err);
        }

        let path = self
            .transfers
            .complete_transfer(metadata.id, TransferDirection::Receiving)
            .await?
            .expect("receiving completion returns a path");
        Ok(path)
    }

    async fn pull_all_chunks(&mut self, metadata: &FileMetadata, total_chunks: u32) -> Result<()> {
        let mut pending: Vec<u32> = (0..total_chunks).collect();
        let mut passes = 0u32;

        while !pending.is_empty() {
            if passes > self.options.max_retransmit_passes {
                tracing::warn!(
                    file = %metadata.path,
                    missing = pending.len(),
                    "retransmission passes exhausted"
                );
                return Err(SyncError::Timeout);
            }
            if passes > 0 {
                tracing::debug!(
                    file = %metadata.path,
                    missing = ?pending,
                    pass = passes,
                    "re-requesting missing chunks"
                );
            }

            for &index in &pending {
                self.request_chunk(metadata.id, index).await?;
            }

            // Tell the sender what we hold after each sweep.
            self.acknowledge(metadata.id).await?;

            pending = self.transfers.missing_chunks(metadata.id)?;
            passes += 1;
        }
        Ok(())
    }

    /// Request one chunk and store its response. A response timeout leaves
    /// the chunk missing for the next sweep; a peer error aborts.
    async fn request_chunk(&mut self, file_id: Uuid, chunk_index: u32) -> Result<()> {
        let request = Packet::FileRequest(FileRequestPayload {
            file_id,
            start_offset: i64::from(chunk_index) * i64::from(self.options.chunk_size),
            chunk_size: self.options.chunk_size as i32,
            compression_type: None,
        });
        self.send_packet(&request).await?;

        loop {
            let (_, packet) = match self.recv_packet().await {
                Ok(decoded) => decoded,
                Err(SyncError::Timeout) => {
                    tracing::debug!(chunk = chunk_index, "chunk response timed out");
                    return Ok(());
                }
                Err(other) => return Err(other),
            };
            match packet {
                Packet::FileData(data) if data.file_id == file_id => {
                    self.transfers.receive_chunk(&data).await?;
                    return Ok(());
                }
                Packet::Error(error) => {
                    return Err(SyncError::PeerError {
                        code: error.code,
                        message: error.message,
                    });
                }
                other => {
                    tracing::debug!(packet = ?other.packet_type(), "ignoring unexpected packet");
                }
            }
        }
    }

    /// Send the authoritative receipt bitmap for a receiving session.
    async fn acknowledge(&mut self, file_id: Uuid) -> Result<()> {
        let bitmap = self
            .transfers
            .session(file_id, TransferDirection::Receiving)
            .map(|s| s.received_bitmap());
        let sequence_number = self.sequence;
        let ack = Packet::Ack(AckPayload {
            sequence_number,
            received_bitmap: bitmap,
        });
        self.send_packet(&ack).await
    }

    /// Offer one local file to the peer and push its chunks, waiting for
    /// selective acknowledgements and retransmitting what the peer has not
    /// confirmed.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` for a missing local file, `PeerError` when
    /// the peer rejects the offer or a chunk, and `Timeout` when
    /// retransmission passes are exhausted.
    pub async fn upload(&mut self, path: &Path) -> Result<()> {
        let metadata = TransferEngine::prepare_file_for_transfer(path).await?;
        let chunk_size = self.options.chunk_size;
        self.transfers
            .start_sending(metadata.clone(), path, chunk_size)
            .await?;

        let offer = Packet::FileList(FileListPayload {
            files: vec![metadata.clone()],
            total_size: metadata.size,
        });
        self.send_packet(&offer).await?;

        let total_chunks = chunk_count(metadata.size, chunk_size);
        tracing::info!(
            file = %metadata.path,
            bytes = metadata.size,
            chunks = total_chunks,
            "upload started"
        );

        let mut pending: Vec<u32> = (0..total_chunks).collect();
        let mut passes = 0u32;
        while !pending.is_empty() {
            if passes > self.options.max_retransmit_passes {
                self.transfers.abort_all().await;
                return Err(SyncError::Timeout);
            }
            for &index in &pending {
                self.push_chunk(metadata.id, index, total_chunks).await?;
            }
            pending = self
                .transfers
                .session(metadata.id, TransferDirection::Sending)
                .map(TransferSession::unacked_chunks)
                .unwrap_or_default();
            passes += 1;
        }

        self.transfers
            .complete_transfer(metadata.id, TransferDirection::Sending)
            .await?;
        Ok(())
    }

    /// Send one chunk and absorb the peer's acknowledgement, if it comes.
    async fn push_chunk(&mut self, file_id: Uuid, chunk_index: u32, total_chunks: u32) -> Result<()> {
        let Some(chunk) = self.transfers.next_chunk(file_id, chunk_index).await? else {
            return Ok(());
        };
        let mut flags = PacketFlags::empty();
        if chunk_index + 1 == total_chunks {
            flags = flags.with(PacketFlags::LAST_CHUNK);
        }
        let sequence = self.next_sequence();
        let datagram = codec::encode_packet_with_flags(&Packet::FileData(chunk), sequence, flags)?;
        self.conn.send(&datagram).await.map_err(SyncError::from)?;

        match self.recv_packet().await {
            Ok((_, Packet::Ack(ack))) => {
                self.transfers
                    .record_ack(file_id, ack.received_bitmap.as_deref());
                Ok(())
            }
            Ok((_, Packet::Error(error))) => Err(SyncError::PeerError {
                code: error.code,
                message: error.message,
            }),
            Ok(_) | Err(SyncError::Timeout) => Ok(()),
            Err(other) => Err(other),
        }
    }

    /// Tear down the conversation and its sessions.
    pub async fn shutdown(mut self) {
        self.transfers.abort_all().await;
        self.conn.cancel();
    }
}
