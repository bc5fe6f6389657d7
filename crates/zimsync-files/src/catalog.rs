//! Shared-directory catalog.
//!
//! The catalog is the set of files a peer offers: the immediate regular-file
//! children of one shared directory. Hidden entries and subdirectories are
//! skipped. Scanning hashes every file, so it runs on demand (in response to
//! a discover) and never on a transfer hot path.

use crate::error::{FileError, Result};
use crate::metadata::FileMetadata;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One shared file: its wire metadata plus where it lives on local disk.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Metadata offered to peers.
    pub metadata: FileMetadata,
    /// Absolute path used to open the file for sending.
    pub local_path: PathBuf,
}

/// Immutable snapshot of the shared directory.
///
/// A fresh snapshot is built per scan and swapped in whole; readers holding
/// an older snapshot keep a consistent view.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Scan `dir` and build a catalog of its immediate regular files.
    ///
    /// Hidden entries (leading `.`), subdirectories, and entries with
    /// non-UTF-8 names are skipped. File IDs are freshly assigned per scan.
    ///
    /// # Errors
    ///
    /// Returns `FileError::NotFound` if `dir` does not exist, or an IO
    /// error from enumeration or hashing.
    pub async fn scan(dir: &Path) -> Result<Self> {
        let mut read_dir = tokio::fs::read_dir(dir)
            .await
            .map_err(|_| FileError::NotFound(dir.to_path_buf()))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }

            let metadata = FileMetadata::from_path(&path).await?;
            tracing::debug!(file = %metadata.path, size = metadata.size, "cataloged shared file");
            entries.push(CatalogEntry {
                metadata,
                local_path: path,
            });
        }

        entries.sort_by(|a, b| a.metadata.path.cmp(&b.metadata.path));
        Ok(Self { entries })
    }

    /// Carry offered IDs over from a previous snapshot.
    ///
    /// A scan assigns fresh IDs, but the offered ID is the peer's handle
    /// for the file; entries whose name and content are unchanged keep the
    /// ID under which they were first offered.
    pub fn adopt_ids(&mut self, previous: &Catalog) {
        for entry in &mut self.entries {
            if let Some(prev) = previous.get_by_name(&entry.metadata.path) {
                if prev.metadata.checksum == entry.metadata.checksum {
                    entry.metadata.id = prev.metadata.id;
                }
            }
        }
    }

    /// Look up a shared file by its offered ID.
    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.metadata.id == *id)
    }

    /// Look up a shared file by basename.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.metadata.path == name)
    }

    /// Wire metadata for every entry, in name order.
    #[must_use]
    pub fn files(&self) -> Vec<FileMetadata> {
        self.entries.iter().map(|e| e.metadata.clone()).collect()
    }

    /// Sum of the sizes of all shared files.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.metadata.size).sum()
    }

    /// Number of shared files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the shared directory holds no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn seed(dir: &Path, name: &str, len: usize) {
        tokio::fs::write(dir.join(name), vec![0x41u8; len])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn scan_lists_regular_files_only() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), "a.wav", 10).await;
        seed(dir.path(), "b.flac", 20).await;
        seed(dir.path(), ".hidden", 5).await;
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        seed(&dir.path().join("sub"), "nested.wav", 30).await;

        let catalog = Catalog::scan(dir.path()).await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.total_size(), 30);
        let names: Vec<_> = catalog.files().iter().map(|m| m.path.clone()).collect();
        assert_eq!(names, vec!["a.wav", "b.flac"]);
    }

    #[tokio::test]
    async fn scan_empty_directory() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::scan(dir.path()).await.unwrap();
        assert!(catalog.is_empty());
        assert_eq!(catalog.total_size(), 0);
        assert!(catalog.files().is_empty());
    }

    #[tokio::test]
    async fn scan_missing_directory() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("gone");
        assert!(matches!(
            Catalog::scan(&gone).await,
            Err(FileError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn adopt_ids_keeps_handles_for_unchanged_files() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), "keep.wav", 16).await;
        seed(dir.path(), "change.wav", 16).await;

        let first = Catalog::scan(dir.path()).await.unwrap();
        let keep_id = first.get_by_name("keep.wav").unwrap().metadata.id;
        let change_id = first.get_by_name("change.wav").unwrap().metadata.id;

        tokio::fs::write(dir.path().join("change.wav"), vec![0x42u8; 16])
            .await
            .unwrap();
        let mut second = Catalog::scan(dir.path()).await.unwrap();
        second.adopt_ids(&first);

        assert_eq!(second.get_by_name("keep.wav").unwrap().metadata.id, keep_id);
        assert_ne!(
            second.get_by_name("change.wav").unwrap().metadata.id,
            change_id
        );
    }

    #[tokio::test]
    async fn lookup_by_id_and_name() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), "kick.wav", 64).await;

        let catalog = Catalog::scan(dir.path()).await.unwrap();
        let id = catalog.files()[0].id;
        assert!(catalog.get(&id).is_some());
        assert!(catalog.get(&Uuid::new_v4()).is_none());
        assert!(catalog.get_by_name("kick.wav").is_some());
        assert!(catalog.get_by_name("snare.wav").is_none());
    }
}
