use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::records::MediaKind;

#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, BlobStoreError>;

/// Type scope for stored blobs; each kind gets its own subdirectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    Photo,
    Video,
    Audio,
    Thumbnail,
}

impl BlobKind {
    /// Primary blob kind for a media kind; Text has none
    pub fn for_media(kind: MediaKind) -> Option<BlobKind> {
        match kind {
            MediaKind::Photo => Some(BlobKind::Photo),
            MediaKind::Video => Some(BlobKind::Video),
            MediaKind::Audio => Some(BlobKind::Audio),
            MediaKind::Text => None,
        }
    }

    /// Wire name used when tagging uploaded assets
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobKind::Photo => "photo",
            BlobKind::Video => "video",
            BlobKind::Audio => "audio",
            BlobKind::Thumbnail => "thumbnail",
        }
    }

    fn subdir(&self) -> &'static str {
        match self {
            BlobKind::Photo => "photos",
            BlobKind::Video => "videos",
            BlobKind::Audio => "audio",
            BlobKind::Thumbnail => "thumbnails",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            BlobKind::Photo => "jpg",
            BlobKind::Video => "mp4",
            BlobKind::Audio => "m4a",
            BlobKind::Thumbnail => "jpg",
        }
    }
}

/// Local filesystem blob store, keyed by type-scoped filename.
///
/// Kind subdirectories are created lazily on first save. The store performs
/// no retries; I/O errors surface to the caller.
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn kind_dir(&self, kind: BlobKind) -> PathBuf {
        self.base_path.join(kind.subdir())
    }

    /// Full path for a stored filename
    pub fn path_for(&self, filename: &str, kind: BlobKind) -> PathBuf {
        self.kind_dir(kind).join(filename)
    }

    pub fn exists(&self, filename: &str, kind: BlobKind) -> bool {
        self.path_for(filename, kind).exists()
    }

    /// Save bytes under a generated filename, returning the filename
    pub fn save(&self, bytes: &[u8], kind: BlobKind) -> Result<String> {
        let filename = format!("{}.{}", Uuid::new_v4(), kind.extension());
        self.save_named(bytes, kind, &filename)?;
        Ok(filename)
    }

    /// Save bytes under a caller-supplied filename (idempotent re-save
    /// after download)
    pub fn save_named(&self, bytes: &[u8], kind: BlobKind, filename: &str) -> Result<String> {
        let dir = self.kind_dir(kind);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(filename), bytes)?;
        Ok(filename.to_string())
    }

    pub fn load(&self, filename: &str, kind: BlobKind) -> Result<Vec<u8>> {
        let path = self.path_for(filename, kind);
        if !path.exists() {
            return Err(BlobStoreError::NotFound(filename.to_string()));
        }
        Ok(fs::read(&path)?)
    }

    /// Delete a blob; deleting a missing blob is not an error
    pub fn delete(&self, filename: &str, kind: BlobKind) -> Result<()> {
        let path = self.path_for(filename, kind);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Total bytes stored across all kind subdirectories
    pub fn usage_bytes(&self) -> u64 {
        if !self.base_path.exists() {
            return 0;
        }
        walkdir::WalkDir::new(&self.base_path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }
}
