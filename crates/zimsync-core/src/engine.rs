//! Per-peer protocol state machine.
//!
//! One engine instance serves one peer conversation. It dispatches decoded
//! packets to handlers, produces the response packets, advances the
//! wrapping 16-bit sequence counter, and owns the transfer sessions for
//! this conversation. Nothing here touches a socket; the server task feeds
//! datagrams in and puts responses on the wire.
//!
//! Server-side states for one peer:
//!
//! ```text
//! Idle --Discover--> CatalogSent --FileRequest--> Transferring
//!         (announce + file list)        (file data chunks, acks)
//! ```
//!
//! A repeated discover re-emits the announcement and catalog from any
//! state. Packets that make no sense in the current state are dropped.

use crate::codec;
use crate::device::DeviceInfo;
use crate::error::{Result, SyncError};
use crate::packet::{
    AckPayload, AnnouncePayload, ErrorCode, ErrorPayload, FileDataPayload, FileListPayload,
    FileRequestPayload, Packet, PacketFlags, PacketHeader,
};
use crate::server::SharedCatalog;
use crate::transfer::{TransferDirection, TransferEngine};
use crate::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, SUPPORTED_FEATURES};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;
use zimsync_files::{validate_basename, FileMetadata};

/// Protocol state of one peer conversation, server perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Nothing heard yet beyond noise.
    Idle,
    /// The peer has our announcement and catalog.
    CatalogSent,
    /// At least one transfer session is live.
    Transferring,
}

/// Tunables for one peer conversation.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Free space advertised in announcements.
    pub available_space: i64,
    /// Directory where pushed files land.
    pub inbound_dir: PathBuf,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            available_space: 1_000_000_000,
            inbound_dir: PathBuf::from("."),
        }
    }
}

/// State machine for one peer conversation.
pub struct SyncEngine {
    device: DeviceInfo,
    catalog: SharedCatalog,
    options: EngineOptions,
    state: PeerState,
    sequence: u16,
    transfers: TransferEngine,
    /// Files the peer has offered to push to us, from its file lists.
    peer_offers: HashMap<Uuid, FileMetadata>,
}

impl SyncEngine {
    /// Engine for a fresh conversation.
    #[must_use]
    pub fn new(device: DeviceInfo, catalog: SharedCatalog, options: EngineOptions) -> Self {
        Self {
            device,
            catalog,
            options,
            state: PeerState::Idle,
            sequence: 0,
            transfers: TransferEngine::new(),
            peer_offers: HashMap::new(),
        }
    }

    /// Current conversation state.
    #[must_use]
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Transfer sessions owned by this conversation.
    #[must_use]
    pub fn transfers(&self) -> &TransferEngine {
        &self.transfers
    }

    /// Next outbound sequence number, wrapping at 16 bits.
    fn next_sequence(&mut self) -> u16 {
        let current = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        current
    }

    /// Encode one response, consuming a sequence number.
    ///
    /// # Errors
    ///
    /// Propagates codec failures.
    pub fn encode_response(&mut self, packet: &Packet, flags: PacketFlags) -> Result<Vec<u8>> {
        let sequence = self.next_sequence();
        Ok(codec::encode_packet_with_flags(packet, sequence, flags)?)
    }

    /// Dispatch one decoded packet and produce the responses to send, in
    /// order. An empty vector means the packet was absorbed or dropped.
    ///
    /// # Errors
    ///
    /// Returns local failures (IO, catalog scan); protocol-visible errors
    /// are returned as [`Packet::Error`] responses instead.
    pub async fn handle_packet(
        &mut self,
        header: &PacketHeader,
        packet: Packet,
    ) -> Result<Vec<(Packet, PacketFlags)>> {
        match packet {
            Packet::Discover(discover) => {
                tracing::debug!(peer_device = %discover.device_id, "discover received");
                self.respond_with_catalog().await
            }
            Packet::FileRequest(request) if self.state != PeerState::Idle => {
                self.handle_file_request(request).await
            }
            Packet::Ack(ack) if self.state != PeerState::Idle => {
                self.handle_ack(&ack).await?;
                Ok(Vec::new())
            }
            Packet::FileData(data) if self.state != PeerState::Idle => {
                self.handle_file_data(header, data).await
            }
            Packet::FileList(list) if self.state != PeerState::Idle => {
                self.handle_peer_offers(list)
            }
            Packet::Error(error) => {
                tracing::warn!(code = ?error.code, message = %error.message, "peer reported error");
                Ok(Vec::new())
            }
            other => {
                tracing::debug!(
                    state = ?self.state,
                    packet = ?other.packet_type(),
                    "dropping packet out of protocol order"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Refresh the catalog and emit the announce / file-list pair.
    async fn respond_with_catalog(&mut self) -> Result<Vec<(Packet, PacketFlags)>> {
        let catalog = self.catalog.refresh().await?;
        if self.state == PeerState::Idle {
            self.state = PeerState::CatalogSent;
        }

        let announce = Packet::Announce(AnnouncePayload {
            device_info: self.device.clone(),
            available_space: self.options.available_space,
            supported_features: SUPPORTED_FEATURES.iter().map(ToString::to_string).collect(),
        });
        let file_list = Packet::FileList(FileListPayload {
            files: catalog.files(),
            total_size: catalog.total_size(),
        });
        Ok(vec![
            (announce, PacketFlags::empty()),
            (file_list, PacketFlags::empty()),
        ])
    }

    /// Serve one requested chunk, starting the send session on first use.
    async fn handle_file_request(
        &mut self,
        request: FileRequestPayload,
    ) -> Result<Vec<(Packet, PacketFlags)>> {
        if request.start_offset < 0
            || request.chunk_size <= 0
            || request.chunk_size as u32 > MAX_CHUNK_SIZE
        {
            return Ok(vec![error_response(
                ErrorCode::UnsupportedFormat,
                "invalid request bounds",
            )]);
        }

        let catalog = self.catalog.snapshot().await;
        let Some(entry) = catalog.get(&request.file_id) else {
            tracing::debug!(id = %request.file_id, "file request for unknown id");
            return Ok(vec![error_response(ErrorCode::FileNotFound, "File not found")]);
        };

        // Acks carry no file handle, so only one sending session may be
        // live per conversation; a request for a second file while one is
        // in flight is refused. The active session closes once the peer
        // acknowledges every chunk.
        if let Some(active_id) = self.transfers.sending_ids().next() {
            if active_id != request.file_id {
                tracing::debug!(
                    active = %active_id,
                    requested = %request.file_id,
                    "refusing concurrent file request"
                );
                return Ok(vec![error_response(
                    ErrorCode::UnsupportedFormat,
                    "another transfer is in progress",
                )]);
            }
        }

        if !self
            .transfers
            .contains(request.file_id, TransferDirection::Sending)
        {
            self.transfers
                .start_sending(
                    entry.metadata.clone(),
                    &entry.local_path,
                    request.chunk_size as u32,
                )
                .await?;
        }

        // The chunk size is fixed for the life of the session; later
        // requests address chunks with the original granularity.
        let session_chunk_size = self
            .transfers
            .session(request.file_id, TransferDirection::Sending)
            .map_or(DEFAULT_CHUNK_SIZE, |s| s.chunk_size());
        let chunk_index = (request.start_offset / i64::from(session_chunk_size)) as u32;

        let Some(chunk) = self.transfers.next_chunk(request.file_id, chunk_index).await? else {
            tracing::debug!(
                id = %request.file_id,
                chunk = chunk_index,
                "request past end of file"
            );
            return Ok(Vec::new());
        };

        self.state = PeerState::Transferring;
        let mut flags = PacketFlags::empty();
        if chunk.chunk_index + 1 == chunk.total_chunks {
            flags = flags.with(PacketFlags::LAST_CHUNK);
        }
        Ok(vec![(Packet::FileData(chunk), flags)])
    }

    /// Record which chunks the peer confirms having stored.
    ///
    /// The ack payload names no file; it binds to the single live sending
    /// session. A bitmap covering every chunk closes that session, freeing
    /// the conversation for the next file.
    async fn handle_ack(&mut self, ack: &AckPayload) -> Result<()> {
        tracing::trace!(sequence = ack.sequence_number, "ack received");
        let Some(file_id) = self.transfers.sending_ids().next() else {
            return Ok(());
        };
        self.transfers
            .record_ack(file_id, ack.received_bitmap.as_deref());

        let fully_acked = self
            .transfers
            .session(file_id, TransferDirection::Sending)
            .is_some_and(|s| s.unacked_chunks().is_empty());
        if fully_acked {
            self.transfers
                .complete_transfer(file_id, TransferDirection::Sending)
                .await?;
            tracing::debug!(id = %file_id, "peer confirmed every chunk");
        }
        Ok(())
    }

    /// Store a pushed chunk and acknowledge it.
    async fn handle_file_data(
        &mut self,
        header: &PacketHeader,
        data: FileDataPayload,
    ) -> Result<Vec<(Packet, PacketFlags)>> {
        if !self
            .transfers
            .contains(data.file_id, TransferDirection::Receiving)
        {
            let Some(metadata) = self.peer_offers.get(&data.file_id).cloned() else {
                return Ok(vec![error_response(ErrorCode::FileNotFound, "File not found")]);
            };
            let Some(chunk_size) = infer_chunk_size(&data) else {
                return Ok(vec![error_response(
                    ErrorCode::UnsupportedFormat,
                    "inconsistent chunk geometry",
                )]);
            };
            let dest = self.options.inbound_dir.join(&metadata.path);
            self.transfers
                .start_receiving(metadata, &dest, chunk_size)
                .await?;
        }

        if let Err(err) = self.transfers.receive_chunk(&data).await {
            return match err.wire_code() {
                Some(code) => Ok(vec![error_response(code, err.to_string())]),
                None => Err(err),
            };
        }
        self.state = PeerState::Transferring;

        let bitmap = self
            .transfers
            .session(data.file_id, TransferDirection::Receiving)
            .map(|s| s.received_bitmap());
        let ack = Packet::Ack(AckPayload {
            sequence_number: header.sequence,
            received_bitmap: bitmap,
        });

        // All chunks stored: verify and finish.
        let complete = self
            .transfers
            .missing_chunks(data.file_id)
            .map(|missing| missing.is_empty())
            .unwrap_or(false);
        if complete {
            match self
                .transfers
                .complete_transfer(data.file_id, TransferDirection::Receiving)
                .await
            {
                Ok(_) => {}
                Err(SyncError::ChecksumMismatch) => {
                    return Ok(vec![error_response(
                        ErrorCode::ChecksumMismatch,
                        "file failed verification",
                    )]);
                }
                Err(other) => return Err(other),
            }
        }

        Ok(vec![(ack, PacketFlags::empty())])
    }

    /// Record the files a peer offers to push, rejecting unsafe names.
    fn handle_peer_offers(
        &mut self,
        list: FileListPayload,
    ) -> Result<Vec<(Packet, PacketFlags)>> {
        for metadata in list.files {
            if validate_basename(&metadata.path).is_err() {
                tracing::warn!(name = %metadata.path, "rejecting offer with unsafe name");
                return Ok(vec![error_response(
                    ErrorCode::UnsupportedFormat,
                    "invalid file name",
                )]);
            }
            self.peer_offers.insert(metadata.id, metadata);
        }
        Ok(Vec::new())
    }

    /// Tear down every session for this conversation; partial receives are
    /// discarded.
    pub async fn abort(&mut self) {
        self.transfers.abort_all().await;
        self.state = PeerState::Idle;
    }
}

/// Derive the sender's chunk size from one data packet.
///
/// Single-chunk files carry no usable geometry, so the default applies.
/// For any other chunk, `offset / chunk_index` recovers the size; the
/// first chunk of a multi-chunk file is necessarily full-size.
fn infer_chunk_size(data: &FileDataPayload) -> Option<u32> {
    let size = if data.total_chunks <= 1 {
        u64::from(DEFAULT_CHUNK_SIZE)
    } else if data.chunk_index == 0 {
        data.original_size
            .map_or(data.data.len() as u64, |n| n as u64)
    } else if data.offset > 0 && data.offset % i64::from(data.chunk_index) == 0 {
        (data.offset / i64::from(data.chunk_index)) as u64
    } else {
        return None;
    };
    (size > 0 && size <= u64::from(MAX_CHUNK_SIZE)).then(|| size as u32)
}

fn error_response(code: ErrorCode, message: impl Into<String>) -> (Packet, PacketFlags) {
    (
        Packet::Error(ErrorPayload::new(code, message)),
        PacketFlags::empty(),
    )
}
