//! Error types for the protocol core.

use crate::packet::{CompressionType, ErrorCode};
use thiserror::Error;
use zimsync_files::FileError;
use zimsync_transport::TransportError;

/// Errors from codec operations: framing, checksums, and compression.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Malformed datagram: short header, bad magic, unknown type, truncated
    /// payload, or undecodable payload.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// The datagram announces a protocol version newer than ours.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The payload checksum does not match the header.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Encoding would exceed the datagram bound.
    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),

    /// The requested compression algorithm is not implemented.
    #[error("unsupported compression algorithm {0:?}")]
    UnsupportedCompression(CompressionType),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
}

/// Errors observable at the core API, mirroring the wire error set.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The transport could not bind or connect.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A datagram could not be decoded.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// A local path or peer file handle is unknown.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Payload, chunk, or full-file integrity check failed.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// An operation did not complete within its bound.
    #[error("operation timed out")]
    Timeout,

    /// The peer reported a protocol error.
    #[error("peer error {code:?}: {message}")]
    PeerError {
        /// Wire error code from the peer.
        code: ErrorCode,
        /// Human-readable message from the peer.
        message: String,
    },

    /// Codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// File layer failure.
    #[error(transparent)]
    File(FileError),

    /// Transport failure; the engine treats this as session termination.
    #[error(transparent)]
    Transport(TransportError),
}

impl SyncError {
    /// The wire error code this failure maps to, when it has one.
    #[must_use]
    pub fn wire_code(&self) -> Option<ErrorCode> {
        match self {
            Self::FileNotFound(_) => Some(ErrorCode::FileNotFound),
            Self::ChecksumMismatch => Some(ErrorCode::ChecksumMismatch),
            Self::Timeout => Some(ErrorCode::Timeout),
            Self::Codec(CodecError::UnsupportedVersion(_) | CodecError::UnsupportedCompression(_)) => {
                Some(ErrorCode::UnsupportedFormat)
            }
            _ => None,
        }
    }
}

impl From<FileError> for SyncError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::NotFound(path) => Self::FileNotFound(path.display().to_string()),
            other => Self::File(other),
        }
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::BindFailed(msg) | TransportError::ConnectionFailed(msg) => {
                Self::ConnectionFailed(msg)
            }
            TransportError::Timeout(_) => Self::Timeout,
            TransportError::EmptyDatagram => Self::InvalidPacket("empty datagram".into()),
            other => Self::Transport(other),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, SyncError>;
