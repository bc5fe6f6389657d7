//! Protocol packet model.
//!
//! Packets are a closed tagged union: a one-byte discriminator in the framed
//! header selects one of seven payload shapes, serialized as self-describing
//! JSON objects. Binary fields travel base64-encoded inside the JSON.

mod header;

pub use header::PacketHeader;

use crate::device::DeviceInfo;
use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use zimsync_files::FileMetadata;

/// Packet type discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Probe for peers and their catalogs.
    Discover = 0x01,
    /// Device identity and capability announcement.
    Announce = 0x02,
    /// Shared-file catalog listing.
    FileList = 0x03,
    /// Request for a chunk of an offered file.
    FileRequest = 0x04,
    /// One chunk of file content.
    FileData = 0x05,
    /// Acknowledgement, optionally with a selective-receipt bitmap.
    Ack = 0x06,
    /// Protocol error report.
    Error = 0x07,
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0x01 => Ok(Self::Discover),
            0x02 => Ok(Self::Announce),
            0x03 => Ok(Self::FileList),
            0x04 => Ok(Self::FileRequest),
            0x05 => Ok(Self::FileData),
            0x06 => Ok(Self::Ack),
            0x07 => Ok(Self::Error),
            other => Err(CodecError::InvalidPacket(format!(
                "unknown packet type 0x{other:02X}"
            ))),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(t: PacketType) -> u8 {
        t as u8
    }
}

/// Header flag bits.
///
/// `COMPRESSED` and `ENCRYPTED` are reserved: compression is signaled by
/// `FileDataPayload::original_size` and no key exchange is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// Reserved; never set by this implementation.
    pub const COMPRESSED: u8 = 0b0000_0001;
    /// Reserved; no key exchange is defined.
    pub const ENCRYPTED: u8 = 0b0000_0010;
    /// This file-data packet carries the final chunk.
    pub const LAST_CHUNK: u8 = 0b0000_0100;
    /// The sender asks for an acknowledgement.
    pub const REQUIRES_ACK: u8 = 0b0000_1000;

    /// No flags set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Flags from a raw byte.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw flag byte.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether `flag` is set.
    #[must_use]
    pub const fn contains(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Copy with `flag` set.
    #[must_use]
    pub const fn with(self, flag: u8) -> Self {
        Self(self.0 | flag)
    }
}

/// Compression algorithms named on the wire.
///
/// Only zlib is implemented; `lz4` and `lzma` stay in the wire vocabulary
/// for compatibility and fail as unsupported when requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// DEFLATE with zlib framing.
    Zlib,
    /// LZ4 block format.
    Lz4,
    /// LZMA.
    Lzma,
    /// Explicitly uncompressed.
    None,
}

/// Wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum ErrorCode {
    /// Requested file or file handle is unknown.
    FileNotFound,
    /// An operation did not complete in time.
    Timeout,
    /// Payload or full-file integrity check failed.
    ChecksumMismatch,
    /// Unsupported version, name, or request shape.
    UnsupportedFormat,
    /// Not enough free space on the shared volume.
    InsufficientSpace,
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        match code {
            ErrorCode::FileNotFound => 404,
            ErrorCode::Timeout => 408,
            ErrorCode::ChecksumMismatch => 409,
            ErrorCode::UnsupportedFormat => 415,
            ErrorCode::InsufficientSpace => 507,
        }
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, String> {
        match value {
            404 => Ok(Self::FileNotFound),
            408 => Ok(Self::Timeout),
            409 => Ok(Self::ChecksumMismatch),
            415 => Ok(Self::UnsupportedFormat),
            507 => Ok(Self::InsufficientSpace),
            other => Err(format!("unknown error code {other}")),
        }
    }
}

/// Payload of [`PacketType::Discover`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverPayload {
    /// Identity of the probing device.
    pub device_id: Uuid,
    /// Probe time, seconds since the unix epoch.
    pub timestamp: u64,
}

/// Payload of [`PacketType::Announce`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncePayload {
    /// Identity of the announcing device.
    pub device_info: DeviceInfo,
    /// Free bytes on the shared volume.
    pub available_space: i64,
    /// Capability strings; "compression", "chunking", and "resume" are
    /// recognized by the core.
    pub supported_features: Vec<String>,
}

/// Payload of [`PacketType::FileList`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListPayload {
    /// Offered files.
    pub files: Vec<FileMetadata>,
    /// Sum of the offered sizes.
    pub total_size: u64,
}

/// Payload of [`PacketType::FileRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequestPayload {
    /// Handle of the requested file.
    pub file_id: Uuid,
    /// Byte offset to read from; must be non-negative.
    pub start_offset: i64,
    /// Requested chunk size; must be positive.
    pub chunk_size: i32,
    /// Preferred compression, when the requester cares.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compression_type: Option<CompressionType>,
}

/// Payload of [`PacketType::FileData`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDataPayload {
    /// Handle of the file this chunk belongs to.
    pub file_id: Uuid,
    /// Chunk index; `offset = chunk_index * chunk_size`.
    pub chunk_index: u32,
    /// Byte offset of this chunk in the file.
    pub offset: i64,
    /// Number of chunks covering the file.
    pub total_chunks: u32,
    /// Chunk bytes, possibly compressed; base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Present iff `data` is compressed: the exact decompressed length.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub original_size: Option<i32>,
}

/// Payload of [`PacketType::Ack`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    /// Sequence number of the packet being acknowledged.
    pub sequence_number: u16,
    /// Selective receipt bitmap: bit `k` set means chunk `k` stored.
    /// Packed little-endian, `ceil(total_chunks / 8)` bytes.
    #[serde(
        with = "base64_bytes_opt",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub received_bitmap: Option<Vec<u8>>,
}

/// Payload of [`PacketType::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Wire error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional structured context.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<HashMap<String, String>>,
}

impl ErrorPayload {
    /// Build an error payload without details.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }
}

/// The closed set of protocol packets.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Probe for peers and their catalogs.
    Discover(DiscoverPayload),
    /// Device identity and capability announcement.
    Announce(AnnouncePayload),
    /// Shared-file catalog listing.
    FileList(FileListPayload),
    /// Request for a chunk of an offered file.
    FileRequest(FileRequestPayload),
    /// One chunk of file content.
    FileData(FileDataPayload),
    /// Acknowledgement.
    Ack(AckPayload),
    /// Protocol error report.
    Error(ErrorPayload),
}

impl Packet {
    /// The discriminator for this packet.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Discover(_) => PacketType::Discover,
            Self::Announce(_) => PacketType::Announce,
            Self::FileList(_) => PacketType::FileList,
            Self::FileRequest(_) => PacketType::FileRequest,
            Self::FileData(_) => PacketType::FileData,
            Self::Ack(_) => PacketType::Ack,
            Self::Error(_) => PacketType::Error,
        }
    }

    /// Serialize the payload to its wire JSON.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacket` if serialization fails.
    pub fn payload_json(&self) -> Result<Vec<u8>, CodecError> {
        let result = match self {
            Self::Discover(p) => serde_json::to_vec(p),
            Self::Announce(p) => serde_json::to_vec(p),
            Self::FileList(p) => serde_json::to_vec(p),
            Self::FileRequest(p) => serde_json::to_vec(p),
            Self::FileData(p) => serde_json::to_vec(p),
            Self::Ack(p) => serde_json::to_vec(p),
            Self::Error(p) => serde_json::to_vec(p),
        };
        result.map_err(|e| CodecError::InvalidPacket(format!("payload encode: {e}")))
    }

    /// Deserialize a payload of the given type from its wire JSON.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacket` if the JSON does not match the payload shape.
    pub fn from_payload_json(packet_type: PacketType, payload: &[u8]) -> Result<Self, CodecError> {
        let decode = |e: serde_json::Error| {
            CodecError::InvalidPacket(format!("{packet_type:?} payload decode: {e}"))
        };
        Ok(match packet_type {
            PacketType::Discover => Self::Discover(serde_json::from_slice(payload).map_err(decode)?),
            PacketType::Announce => Self::Announce(serde_json::from_slice(payload).map_err(decode)?),
            PacketType::FileList => Self::FileList(serde_json::from_slice(payload).map_err(decode)?),
            PacketType::FileRequest => {
                Self::FileRequest(serde_json::from_slice(payload).map_err(decode)?)
            }
            PacketType::FileData => Self::FileData(serde_json::from_slice(payload).map_err(decode)?),
            PacketType::Ack => Self::Ack(serde_json::from_slice(payload).map_err(decode)?),
            PacketType::Error => Self::Error(serde_json::from_slice(payload).map_err(decode)?),
        })
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(D::Error::custom)
    }
}

mod base64_bytes_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, ser: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => ser.serialize_some(&STANDARD.encode(b)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(de)?;
        s.map(|s| STANDARD.decode(s).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_type_roundtrip() {
        for byte in 0x01..=0x07u8 {
            let t = PacketType::try_from(byte).unwrap();
            assert_eq!(u8::from(t), byte);
        }
    }

    #[test]
    fn packet_type_unknown_bytes() {
        for byte in [0x00u8, 0x08, 0x42, 0xFF] {
            assert!(PacketType::try_from(byte).is_err());
        }
    }

    #[test]
    fn flags_set_and_query() {
        let f = PacketFlags::empty()
            .with(PacketFlags::LAST_CHUNK)
            .with(PacketFlags::REQUIRES_ACK);
        assert!(f.contains(PacketFlags::LAST_CHUNK));
        assert!(f.contains(PacketFlags::REQUIRES_ACK));
        assert!(!f.contains(PacketFlags::COMPRESSED));
        assert_eq!(f.bits(), 0b0000_1100);
    }

    #[test]
    fn error_code_wire_values() {
        assert_eq!(u16::from(ErrorCode::FileNotFound), 404);
        assert_eq!(u16::from(ErrorCode::Timeout), 408);
        assert_eq!(u16::from(ErrorCode::ChecksumMismatch), 409);
        assert_eq!(u16::from(ErrorCode::UnsupportedFormat), 415);
        assert_eq!(u16::from(ErrorCode::InsufficientSpace), 507);
        assert!(ErrorCode::try_from(500u16).is_err());
    }

    #[test]
    fn error_code_json_is_numeric() {
        let payload = ErrorPayload::new(ErrorCode::FileNotFound, "File not found");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json.get("code").unwrap().as_u64(), Some(404));
    }

    #[test]
    fn compression_type_json_names() {
        assert_eq!(
            serde_json::to_string(&CompressionType::Zlib).unwrap(),
            "\"zlib\""
        );
        assert_eq!(
            serde_json::to_string(&CompressionType::None).unwrap(),
            "\"none\""
        );
    }

    #[test]
    fn file_data_payload_base64_and_field_names() {
        let payload = FileDataPayload {
            file_id: Uuid::nil(),
            chunk_index: 2,
            offset: 65_536,
            total_chunks: 4,
            data: vec![0x00, 0x01, 0x02],
            original_size: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json.get("data").unwrap().as_str(), Some("AAEC"));
        assert!(json.get("chunkIndex").is_some());
        assert!(json.get("totalChunks").is_some());
        assert!(json.get("originalSize").is_none());

        let back: FileDataPayload =
            serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn file_request_compression_absent_and_present() {
        let without: FileRequestPayload = serde_json::from_str(
            r#"{"fileId":"00000000-0000-0000-0000-000000000001","startOffset":0,"chunkSize":32768}"#,
        )
        .unwrap();
        assert_eq!(without.compression_type, None);

        let with: FileRequestPayload = serde_json::from_str(
            r#"{"fileId":"00000000-0000-0000-0000-000000000001","startOffset":0,"chunkSize":32768,"compressionType":"zlib"}"#,
        )
        .unwrap();
        assert_eq!(with.compression_type, Some(CompressionType::Zlib));
    }

    #[test]
    fn ack_bitmap_roundtrip() {
        let payload = AckPayload {
            sequence_number: 7,
            received_bitmap: Some(vec![0b1010_0101]),
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: AckPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);

        let bare: AckPayload = serde_json::from_str(r#"{"sequenceNumber":7}"#).unwrap();
        assert_eq!(bare.received_bitmap, None);
    }
}
