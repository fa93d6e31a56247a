mod http;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::blob::BlobKind;

pub use http::{HttpAssetStore, RemoteCredentials};

#[derive(Error, Debug)]
pub enum RemoteStoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Storage quota exceeded")]
    QuotaExceeded,

    #[error("Conflict: remote asset was modified")]
    Conflict,

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Storage namespace in the remote asset store.
///
/// Zones are established externally by the sharing workflow; the store
/// accepts the token opaquely and does not manage partition lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Partition {
    #[default]
    Private,
    Shared { zone: String },
}

impl Partition {
    /// Path segment identifying the partition on the remote store
    pub fn zone_segment(&self) -> &str {
        match self {
            Partition::Private => "private",
            Partition::Shared { zone } => zone,
        }
    }
}

/// Scalar fields attached to an uploaded asset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    pub owner_record_id: Uuid,
    pub kind: BlobKind,
    pub byte_size: u64,
    /// SHA-256 over the exact local byte content prior to upload
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
}

/// Transfer progress callback: (bytes transferred, total bytes)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// A no-op progress callback for transfers nobody observes
pub fn no_progress() -> ProgressCallback {
    Arc::new(|_, _| {})
}

/// Abstraction over the cloud backend's large-object primitive
#[async_trait]
pub trait RemoteAssetStore: Send + Sync {
    /// Stream bytes up and create an asset record, returning its stable id
    async fn create_asset(
        &self,
        bytes: Bytes,
        metadata: &AssetMetadata,
        partition: &Partition,
        progress: ProgressCallback,
    ) -> Result<String, RemoteStoreError>;

    /// Fetch an asset's bytes. A stale identifier (asset deleted remotely)
    /// fails with `NotFound`, which is distinct and non-retryable.
    async fn fetch_asset(
        &self,
        asset_id: &str,
        partition: &Partition,
    ) -> Result<Bytes, RemoteStoreError>;

    async fn delete_asset(
        &self,
        asset_id: &str,
        partition: &Partition,
    ) -> Result<(), RemoteStoreError>;
}
