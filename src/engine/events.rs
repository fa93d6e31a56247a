use serde::Serialize;
use uuid::Uuid;

use crate::records::MediaSyncStatus;

/// State-change notifications pushed by the engine.
///
/// UI layers subscribe to this channel instead of polling record files;
/// slow subscribers may miss events and should re-read the store.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StatusChanged {
        record_id: Uuid,
        status: MediaSyncStatus,
    },
    UploadProgress {
        record_id: Uuid,
        fraction: f32,
    },
    TransferFailed {
        record_id: Uuid,
        message: String,
    },
    NetworkAvailable {
        available: bool,
    },
}

/// Snapshot of observable engine state for status displays
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncOverview {
    /// Records queued for upload
    pub pending_uploads: usize,
    /// Records whose last attempt failed terminally
    pub failed: usize,
    pub in_flight_uploads: usize,
    pub in_flight_downloads: usize,
    pub network_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
