use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::remote::Partition;

/// What kind of media a memory record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    /// Text memories have no binary asset
    Text,
}

impl MediaKind {
    /// Whether records of this kind have a binary payload to sync
    pub fn carries_media(&self) -> bool {
        !matches!(self, MediaKind::Text)
    }
}

/// Per-asset sync status, persisted on the owning record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum MediaSyncStatus {
    /// Explicit opt-out: never sync this asset
    LocalOnly,
    /// Queued for upload
    #[default]
    Pending,
    /// Upload in flight
    Uploading,
    /// Download in flight
    Downloading,
    /// Remote copy exists and matches local knowledge
    Synced,
    /// Last attempt failed; requires explicit action to resolve
    Failed,
}

impl MediaSyncStatus {
    /// States in which no further upload will be attempted automatically
    pub fn is_upload_settled(&self) -> bool {
        matches!(self, MediaSyncStatus::Synced | MediaSyncStatus::LocalOnly)
    }
}

/// A memory record as materialized locally by the record replication layer.
///
/// The replication layer owns creation and deletion; this engine mutates
/// only the sync-owned fields (status, remote ids, progress, error).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Stable local identifier, never reused
    pub id: Uuid,
    /// Parent person profile, the shareable entity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<Uuid>,
    pub media_kind: MediaKind,
    /// Filename in the blob store; nil until saved locally
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_blob_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_thumbnail_path: Option<String>,
    pub media_sync_status: MediaSyncStatus,
    #[serde(default)]
    pub thumbnail_sync_status: MediaSyncStatus,
    /// Private-partition identifier in the remote asset store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_asset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_thumbnail_id: Option<String>,
    /// Shared-partition identifiers, set by the shared-zone coordinator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_asset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_thumbnail_id: Option<String>,
    /// Zone the shared copies live in, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_zone: Option<String>,
    /// Byte size captured at creation, for progress computation
    #[serde(default)]
    pub media_byte_size: i64,
    /// Fraction in [0,1]; persisted so UI progress survives relaunch
    #[serde(default)]
    pub upload_progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_attempt: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_error_message: Option<String>,
    #[serde(default)]
    pub owner_partition: Partition,
    /// Many-to-many tag relationships; detached around share creation
    #[serde(default)]
    pub tags: Vec<Uuid>,
    /// Tombstone applied when the record was deleted remotely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Create a record the way a capture flow would, before any sync attempt.
    ///
    /// Media kinds start `Pending`; Text records sit in `LocalOnly` since
    /// they never enter the sync flow.
    pub fn new(media_kind: MediaKind) -> Self {
        let now = Utc::now();
        let status = if media_kind.carries_media() {
            MediaSyncStatus::Pending
        } else {
            MediaSyncStatus::LocalOnly
        };
        Self {
            id: Uuid::new_v4(),
            profile_id: None,
            media_kind,
            local_blob_path: None,
            local_thumbnail_path: None,
            media_sync_status: status,
            thumbnail_sync_status: status,
            remote_asset_id: None,
            remote_thumbnail_id: None,
            shared_asset_id: None,
            shared_thumbnail_id: None,
            shared_zone: None,
            media_byte_size: 0,
            upload_progress: 0.0,
            last_sync_attempt: None,
            sync_error_message: None,
            owner_partition: Partition::Private,
            tags: Vec::new(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether this record has a local binary payload that could be uploaded
    pub fn has_local_media(&self) -> bool {
        self.media_kind.carries_media() && self.local_blob_path.is_some()
    }
}

/// Change notification emitted by the record store.
///
/// This is the seam the record replication layer feeds: remotely-applied
/// updates and deletions surface here so consumers can react.
#[derive(Debug, Clone)]
pub enum RecordChange {
    Updated { record_id: Uuid },
    Deleted { record_id: Uuid },
}
