//! Packet codec: framing, checksums, and buffer-level compression.
//!
//! Encoding serializes a packet's payload to JSON, prefixes the framed
//! header, and stamps the payload checksum (the first 4 bytes of the
//! payload's SHA-256). Decoding validates in the reverse order: header
//! shape, magic, version, type, payload bounds, checksum, then payload.
//!
//! Compression is transparent at this layer: output that fails to shrink
//! the input is discarded and the caller is told no compression applied.

use crate::error::CodecError;
use crate::packet::{CompressionType, Packet, PacketFlags, PacketHeader};
use crate::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE};
use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::Write;

/// File extensions whose content is already compressed. Chunks of these
/// formats are never recompressed; zlib over entropy-coded audio wastes
/// cycles for sub-percent gains.
pub const PRECOMPRESSED_EXTENSIONS: [&str; 6] = ["mp3", "m4a", "aac", "ogg", "opus", "flac"];

/// Compression is kept only when the output is smaller than this fraction
/// of the input.
const AUDIO_COMPRESSION_RATIO: (usize, usize) = (9, 10);

/// First 4 bytes of the SHA-256 hash of `payload`.
#[must_use]
pub fn payload_checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Encode `packet` into a self-contained datagram.
///
/// # Errors
///
/// Returns `PacketTooLarge` if the framed datagram would exceed
/// [`MAX_PACKET_SIZE`], or `InvalidPacket` if payload serialization fails.
pub fn encode_packet(packet: &Packet, sequence: u16) -> Result<Vec<u8>, CodecError> {
    encode_packet_with_flags(packet, sequence, PacketFlags::empty())
}

/// Encode `packet` with explicit header flags.
///
/// # Errors
///
/// Same as [`encode_packet`].
pub fn encode_packet_with_flags(
    packet: &Packet,
    sequence: u16,
    flags: PacketFlags,
) -> Result<Vec<u8>, CodecError> {
    let payload = packet.payload_json()?;
    let total = PACKET_HEADER_SIZE + payload.len();
    if total > MAX_PACKET_SIZE {
        return Err(CodecError::PacketTooLarge(total));
    }

    let header = PacketHeader::new(
        packet.packet_type(),
        flags,
        sequence,
        payload.len() as u32,
        payload_checksum(&payload),
    );

    let mut datagram = Vec::with_capacity(total);
    datagram.extend_from_slice(&header.encode());
    datagram.extend_from_slice(&payload);
    Ok(datagram)
}

/// Decode one datagram into its header and packet.
///
/// # Errors
///
/// Returns `InvalidPacket` for malformed framing, `UnsupportedVersion` for
/// newer protocol versions, and `ChecksumMismatch` when the payload does
/// not hash to the header checksum.
pub fn decode_packet(datagram: &[u8]) -> Result<(PacketHeader, Packet), CodecError> {
    let header = PacketHeader::decode(datagram)?;

    let payload_end = PACKET_HEADER_SIZE
        .checked_add(header.payload_size as usize)
        .ok_or_else(|| CodecError::InvalidPacket("payload size overflow".into()))?;
    if payload_end > datagram.len() {
        return Err(CodecError::InvalidPacket(format!(
            "payload of {} bytes reads past the {}-byte datagram",
            header.payload_size,
            datagram.len()
        )));
    }

    let payload = &datagram[PACKET_HEADER_SIZE..payload_end];
    if payload_checksum(payload) != header.checksum {
        return Err(CodecError::ChecksumMismatch);
    }

    let packet = Packet::from_payload_json(header.packet_type, payload)?;
    Ok((header, packet))
}

/// Compress `data` with `algorithm`.
///
/// Transparent: returns `None` when the compressed form is not strictly
/// smaller than the input, in which case the caller sends the input as-is.
///
/// # Errors
///
/// Returns `UnsupportedCompression` for algorithms other than zlib and
/// `Compression` on encoder failure.
pub fn compress(data: &[u8], algorithm: CompressionType) -> Result<Option<Vec<u8>>, CodecError> {
    let compressed = match algorithm {
        CompressionType::None => return Ok(None),
        CompressionType::Zlib => zlib_compress(data)?,
        other => return Err(CodecError::UnsupportedCompression(other)),
    };
    if compressed.len() < data.len() {
        Ok(Some(compressed))
    } else {
        Ok(None)
    }
}

/// Decompress `data` with `algorithm`.
///
/// # Errors
///
/// Returns `UnsupportedCompression` for algorithms other than zlib and
/// `Compression` when the stream is corrupt.
pub fn decompress(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>, CodecError> {
    match algorithm {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Zlib => zlib_decompress(data),
        other => Err(CodecError::UnsupportedCompression(other)),
    }
}

/// Decide and apply compression for one chunk of a file with the given
/// extension.
///
/// Already-compressed audio formats pass through untouched. Everything
/// else is zlib-compressed and kept only when it saves more than 10%.
/// Returns the bytes to send and the algorithm applied, if any.
///
/// # Errors
///
/// Returns `Compression` on encoder failure.
pub fn compress_audio_chunk(
    data: &[u8],
    extension: Option<&str>,
) -> Result<(Vec<u8>, Option<CompressionType>), CodecError> {
    if let Some(ext) = extension {
        let ext = ext.to_lowercase();
        if PRECOMPRESSED_EXTENSIONS.contains(&ext.as_str()) {
            return Ok((data.to_vec(), None));
        }
    }

    let compressed = zlib_compress(data)?;
    let (num, den) = AUDIO_COMPRESSION_RATIO;
    if compressed.len() * den < data.len() * num {
        Ok((compressed, Some(CompressionType::Zlib)))
    } else {
        Ok((data.to_vec(), None))
    }
}

fn zlib_compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = ZlibDecoder::new(Vec::new());
    decoder.write_all(data)?;
    Ok(decoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInfo, Platform};
    use crate::packet::{
        AckPayload, AnnouncePayload, DiscoverPayload, ErrorCode, ErrorPayload, FileDataPayload,
        FileListPayload, FileRequestPayload, PacketType,
    };
    use rand::{Rng, SeedableRng};
    use uuid::Uuid;

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen()).collect()
    }

    fn sample_packets() -> Vec<Packet> {
        let device = DeviceInfo {
            id: Uuid::new_v4(),
            name: "Studio".into(),
            platform: Platform::MacOs,
            version: "1.0.0".into(),
        };
        vec![
            Packet::Discover(DiscoverPayload {
                device_id: Uuid::new_v4(),
                timestamp: 1_700_000_000,
            }),
            Packet::Announce(AnnouncePayload {
                device_info: device,
                available_space: 1_000_000_000,
                supported_features: crate::SUPPORTED_FEATURES
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            }),
            Packet::FileList(FileListPayload {
                files: vec![],
                total_size: 0,
            }),
            Packet::FileRequest(FileRequestPayload {
                file_id: Uuid::new_v4(),
                start_offset: 0,
                chunk_size: 32_768,
                compression_type: Some(CompressionType::Zlib),
            }),
            Packet::FileData(FileDataPayload {
                file_id: Uuid::new_v4(),
                chunk_index: 3,
                offset: 98_304,
                total_chunks: 4,
                data: vec![0xAB; 512],
                original_size: Some(1_024),
            }),
            Packet::Ack(AckPayload {
                sequence_number: 42,
                received_bitmap: Some(vec![0xFF, 0x07]),
            }),
            Packet::Error(ErrorPayload::new(ErrorCode::FileNotFound, "File not found")),
        ]
    }

    #[test]
    fn roundtrip_every_variant_and_sequence() {
        for packet in sample_packets() {
            for sequence in [0u16, 1, u16::MAX] {
                let datagram = encode_packet(&packet, sequence).unwrap();
                let (header, decoded) = decode_packet(&datagram).unwrap();
                assert_eq!(header.sequence, sequence);
                assert_eq!(header.packet_type, packet.packet_type());
                assert_eq!(decoded, packet);
            }
        }
    }

    #[test]
    fn flipping_any_payload_bit_fails_checksum() {
        let packet = Packet::Discover(DiscoverPayload {
            device_id: Uuid::nil(),
            timestamp: 12345,
        });
        let datagram = encode_packet(&packet, 9).unwrap();

        for byte_index in PACKET_HEADER_SIZE..datagram.len() {
            for bit in 0..8 {
                let mut corrupted = datagram.clone();
                corrupted[byte_index] ^= 1 << bit;
                assert!(
                    matches!(decode_packet(&corrupted), Err(CodecError::ChecksumMismatch)),
                    "byte {byte_index} bit {bit} slipped through"
                );
            }
        }
    }

    #[test]
    fn bad_magic_and_newer_version_rejected() {
        let packet = Packet::Ack(AckPayload {
            sequence_number: 0,
            received_bitmap: None,
        });
        let datagram = encode_packet(&packet, 0).unwrap();

        let mut bad_magic = datagram.clone();
        bad_magic[0] = 0x00;
        assert!(matches!(
            decode_packet(&bad_magic),
            Err(CodecError::InvalidPacket(_))
        ));

        let mut future_version = datagram;
        future_version[4] = 2;
        assert!(matches!(
            decode_packet(&future_version),
            Err(CodecError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn truncated_payload_rejected() {
        let packet = Packet::Discover(DiscoverPayload {
            device_id: Uuid::nil(),
            timestamp: 1,
        });
        let datagram = encode_packet(&packet, 0).unwrap();
        assert!(matches!(
            decode_packet(&datagram[..datagram.len() - 1]),
            Err(CodecError::InvalidPacket(_))
        ));
    }

    #[test]
    fn short_datagram_rejected() {
        assert!(matches!(
            decode_packet(&[0x5A, 0x49, 0x4D]),
            Err(CodecError::InvalidPacket(_))
        ));
    }

    #[test]
    fn oversized_packet_refused() {
        let packet = Packet::FileData(FileDataPayload {
            file_id: Uuid::nil(),
            chunk_index: 0,
            offset: 0,
            total_chunks: 1,
            data: vec![0xA5; MAX_PACKET_SIZE],
            original_size: None,
        });
        assert!(matches!(
            encode_packet(&packet, 0),
            Err(CodecError::PacketTooLarge(_))
        ));
    }

    #[test]
    fn zlib_roundtrip() {
        let data: Vec<u8> = b"silence ".repeat(1000);
        let compressed = compress(&data, CompressionType::Zlib).unwrap().unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed, CompressionType::Zlib).unwrap(), data);
    }

    #[test]
    fn incompressible_input_passes_through() {
        // High-entropy input: zlib falls back to stored blocks, which can
        // only grow the data, so the no-op sentinel must come back.
        let data = random_bytes(1024, 1);
        assert!(compress(&data, CompressionType::Zlib).unwrap().is_none());
    }

    #[test]
    fn unimplemented_algorithms_rejected() {
        assert!(matches!(
            compress(b"x", CompressionType::Lz4),
            Err(CodecError::UnsupportedCompression(CompressionType::Lz4))
        ));
        assert!(matches!(
            decompress(b"x", CompressionType::Lzma),
            Err(CodecError::UnsupportedCompression(CompressionType::Lzma))
        ));
    }

    #[test]
    fn audio_policy_skips_precompressed_formats() {
        let data = vec![0u8; 4096]; // would compress extremely well
        for ext in PRECOMPRESSED_EXTENSIONS {
            let (out, algorithm) = compress_audio_chunk(&data, Some(ext)).unwrap();
            assert_eq!(out, data);
            assert_eq!(algorithm, None);
        }
        // Case-insensitive.
        let (out, algorithm) = compress_audio_chunk(&data, Some("MP3")).unwrap();
        assert_eq!(out, data);
        assert_eq!(algorithm, None);
    }

    #[test]
    fn audio_policy_compresses_raw_formats_when_worthwhile() {
        let data = vec![0u8; 32_768];
        let (out, algorithm) = compress_audio_chunk(&data, Some("wav")).unwrap();
        assert_eq!(algorithm, Some(CompressionType::Zlib));
        assert!(out.len() * 10 < data.len() * 9);
        assert_eq!(decompress(&out, CompressionType::Zlib).unwrap(), data);
    }

    #[test]
    fn audio_policy_keeps_input_when_savings_are_small() {
        // Random bytes do not meet the 10% savings bar.
        let data = random_bytes(8192, 2);
        let (out, algorithm) = compress_audio_chunk(&data, Some("wav")).unwrap();
        assert_eq!(algorithm, None);
        assert_eq!(out, data);
    }

    #[test]
    fn audio_policy_without_extension_still_compresses() {
        let data = vec![7u8; 10_000];
        let (_, algorithm) = compress_audio_chunk(&data, None).unwrap();
        assert_eq!(algorithm, Some(CompressionType::Zlib));
    }

    #[test]
    fn decode_all_types_map_to_discriminators() {
        for packet in sample_packets() {
            let datagram = encode_packet(&packet, 0).unwrap();
            assert_eq!(datagram[5], u8::from(packet.packet_type()));
        }
        assert_eq!(u8::from(PacketType::Discover), 0x01);
        assert_eq!(u8::from(PacketType::Error), 0x07);
    }
}
