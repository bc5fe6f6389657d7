//! # ZimSync Core
//!
//! Wire protocol and transfer engine for ZimSync, a LAN peer-to-peer file
//! synchronization service tuned for audio-production workflows.
//!
//! This crate provides:
//! - The framed packet format and its binary codec
//! - The closed set of protocol packet variants
//! - Buffer-level compression with an audio-aware policy
//! - Per-file chunked transfer sessions with integrity verification
//! - The per-peer session state machine, server, and pull-model client
//!
//! Transports and discovery are consumed through the interfaces in
//! `zimsync-transport` and `zimsync-discovery`; the core never opens
//! sockets of its own.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod codec;
pub mod device;
pub mod engine;
pub mod error;
pub mod packet;
pub mod server;
pub mod transfer;

pub use client::{ClientOptions, SyncClient};
pub use device::{DeviceInfo, Platform};
pub use engine::{EngineOptions, PeerState, SyncEngine};
pub use error::{CodecError, SyncError};
pub use packet::{
    AckPayload, AnnouncePayload, CompressionType, DiscoverPayload, ErrorCode, ErrorPayload,
    FileDataPayload, FileListPayload, FileRequestPayload, Packet, PacketFlags, PacketHeader,
    PacketType,
};
pub use server::{ServerOptions, SharedCatalog, SyncServer};
pub use transfer::{TransferDirection, TransferEngine, TransferSession};

/// Wire magic constant, "ZIMS".
pub const PROTOCOL_MAGIC: u32 = 0x5A49_4D53;

/// Current protocol version byte. Peers announcing a higher version are
/// answered with an unsupported-version error and dropped.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the framed packet header on the wire.
pub const PACKET_HEADER_SIZE: usize = 17;

/// Largest datagram the protocol will emit or accept.
pub const MAX_PACKET_SIZE: usize = 65_536;

/// Default UDP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default transfer chunk size.
pub const DEFAULT_CHUNK_SIZE: u32 = zimsync_files::DEFAULT_CHUNK_SIZE;

/// Largest chunk size a transfer session will accept. Chunk bytes travel
/// base64-encoded inside a JSON payload, so the raw chunk must stay well
/// under the datagram bound after a 4/3 expansion plus framing.
pub const MAX_CHUNK_SIZE: u32 = 45_056;

/// Features advertised in every announce packet.
pub const SUPPORTED_FEATURES: [&str; 3] = ["compression", "chunking", "resume"];
