//! Framed packet header encoding and decoding.
//!
//! Every datagram starts with a fixed header, big-endian on the wire:
//!
//! ```text
//!  Offset  Size  Field
//!  0       4     Magic 0x5A494D53 ("ZIMS")
//!  4       1     Protocol version
//!  5       1     Packet type
//!  6       1     Flags
//!  7       2     Sequence number
//!  9       4     Payload size
//!  13      4     Checksum (first 4 bytes of SHA-256 of the payload)
//! ```

use super::{PacketFlags, PacketType};
use crate::error::CodecError;
use crate::{PACKET_HEADER_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION};

/// Fixed-size framed header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol version byte.
    pub version: u8,
    /// Packet type discriminator.
    pub packet_type: PacketType,
    /// Flag bits.
    pub flags: PacketFlags,
    /// Conversation sequence number.
    pub sequence: u16,
    /// Number of payload bytes following the header.
    pub payload_size: u32,
    /// First 4 bytes of the SHA-256 hash of the payload.
    pub checksum: [u8; 4],
}

impl PacketHeader {
    /// Build a header for the current protocol version.
    #[must_use]
    pub fn new(
        packet_type: PacketType,
        flags: PacketFlags,
        sequence: u16,
        payload_size: u32,
        checksum: [u8; 4],
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            packet_type,
            flags,
            sequence,
            payload_size,
            checksum,
        }
    }

    /// Encode the header into its wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut buf = [0u8; PACKET_HEADER_SIZE];
        buf[0..4].copy_from_slice(&PROTOCOL_MAGIC.to_be_bytes());
        buf[4] = self.version;
        buf[5] = self.packet_type.into();
        buf[6] = self.flags.bits();
        buf[7..9].copy_from_slice(&self.sequence.to_be_bytes());
        buf[9..13].copy_from_slice(&self.payload_size.to_be_bytes());
        buf[13..17].copy_from_slice(&self.checksum);
        buf
    }

    /// Decode a header from the front of a datagram.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacket` if the buffer is shorter than the header,
    /// the magic does not match, or the type byte is unknown; returns
    /// `UnsupportedVersion` for version bytes newer than ours.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(CodecError::InvalidPacket(format!(
                "datagram of {} bytes is shorter than the {PACKET_HEADER_SIZE}-byte header",
                buf.len()
            )));
        }

        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != PROTOCOL_MAGIC {
            return Err(CodecError::InvalidPacket(format!(
                "bad magic 0x{magic:08X}"
            )));
        }

        let version = buf[4];
        if version > PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let packet_type = PacketType::try_from(buf[5])?;
        let flags = PacketFlags::from_bits(buf[6]);
        let sequence = u16::from_be_bytes([buf[7], buf[8]]);
        let payload_size = u32::from_be_bytes([buf[9], buf[10], buf[11], buf[12]]);
        let checksum = [buf[13], buf[14], buf[15], buf[16]];

        Ok(Self {
            version,
            packet_type,
            flags,
            sequence,
            payload_size,
            checksum,
        })
    }
}
