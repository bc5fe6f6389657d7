//! File metadata exchanged in the shared-file catalog.

use crate::error::{FileError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Audio properties attached to catalog entries for audio files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetadata {
    /// Duration in seconds.
    pub duration: f64,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channel_count: u32,
    /// Container/codec name, e.g. "wav" or "aiff".
    pub format: String,
}

/// Metadata for one shared file.
///
/// The `id` is assigned by the sender when the file is offered and is the
/// handle used in every subsequent packet for this file. `path` carries the
/// basename only; names with separators or `..` components are rejected
/// before a receive session is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Sender-assigned file handle.
    pub id: Uuid,
    /// File basename.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time, seconds since the unix epoch.
    pub modified_at: u64,
    /// SHA-256 of the entire content, hex-encoded on the wire.
    #[serde(with = "checksum_hex")]
    pub checksum: [u8; 32],
    /// Audio properties, when known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub audio: Option<AudioMetadata>,
}

impl FileMetadata {
    /// Build metadata for a file on disk, computing its full-content hash.
    ///
    /// Assigns a fresh UUID; the caller keeps the returned metadata as the
    /// authoritative description of the file for the life of the offer.
    ///
    /// # Errors
    ///
    /// Returns `FileError::NotFound` if the path does not name a regular
    /// file, or an IO error from stat/read.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| FileError::NotFound(path.to_path_buf()))?;
        if !meta.is_file() {
            return Err(FileError::NotFound(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FileError::InvalidName(path.display().to_string()))?
            .to_owned();

        let modified_at = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());

        let checksum = crate::hasher::hash_file(path).await?;

        Ok(Self {
            id: Uuid::new_v4(),
            path: name,
            size: meta.len(),
            modified_at,
            checksum,
            audio: None,
        })
    }

    /// Current time as seconds since the unix epoch.
    #[must_use]
    pub fn now_unix() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }

    /// Lowercase extension of the file name, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
    }
}

/// Reject basenames that could escape the inbound directory.
///
/// A valid shared-file name is non-empty, contains no path separators, and
/// is not a parent reference.
///
/// # Errors
///
/// Returns `FileError::InvalidName` for names containing `/`, `\`, or `..`
/// components, and for empty names.
pub fn validate_basename(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name.contains("..");
    if invalid {
        Err(FileError::InvalidName(name.to_owned()))
    } else {
        Ok(())
    }
}

mod checksum_hex {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(de)?;
        let raw = hex::decode(&s).map_err(D::Error::custom)?;
        raw.try_into()
            .map_err(|_| D::Error::custom("checksum must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn metadata_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("take1.wav");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"RIFF....WAVE").unwrap();
        drop(f);

        let meta = FileMetadata::from_path(&path).await.unwrap();
        assert_eq!(meta.path, "take1.wav");
        assert_eq!(meta.size, 12);
        assert_eq!(meta.extension().as_deref(), Some("wav"));
        assert_ne!(meta.checksum, [0u8; 32]);
    }

    #[tokio::test]
    async fn metadata_missing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.wav");
        assert!(matches!(
            FileMetadata::from_path(&missing).await,
            Err(FileError::NotFound(_))
        ));
    }

    #[test]
    fn metadata_json_field_names() {
        let meta = FileMetadata {
            id: Uuid::nil(),
            path: "loop.wav".into(),
            size: 4,
            modified_at: 1_700_000_000,
            checksum: [0xAB; 32],
            audio: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("modifiedAt").is_some());
        assert_eq!(
            json.get("checksum").unwrap().as_str().unwrap(),
            "ab".repeat(32)
        );
        assert!(json.get("audio").is_none());
    }

    #[test]
    fn metadata_json_roundtrip_with_audio() {
        let meta = FileMetadata {
            id: Uuid::new_v4(),
            path: "mix.aiff".into(),
            size: 1024,
            modified_at: 0,
            checksum: [7; 32],
            audio: Some(AudioMetadata {
                duration: 12.5,
                sample_rate: 48_000,
                channel_count: 2,
                format: "aiff".into(),
            }),
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: FileMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn basename_validation() {
        assert!(validate_basename("note.wav").is_ok());
        assert!(validate_basename("no extension").is_ok());
        assert!(validate_basename("../etc/passwd").is_err());
        assert!(validate_basename("a/b.wav").is_err());
        assert!(validate_basename("a\\b.wav").is_err());
        assert!(validate_basename("..").is_err());
        assert!(validate_basename("").is_err());
    }
}
