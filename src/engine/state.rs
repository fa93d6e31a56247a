use crate::records::MediaSyncStatus;
use crate::remote::RemoteStoreError;

/// Classification of a transfer failure, driving retry routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Unreachable, timeout, or 5xx; expected to self-resolve
    Transient,
    /// Stale remote reference; the asset is gone
    NotFound,
    /// Retryable only after the user frees space
    QuotaExceeded,
    /// Remote object changed unexpectedly; needs manual resolution
    Conflict,
    /// No local copy to upload
    LocalFileMissing,
    /// Anything else; treated conservatively as non-retryable
    Other,
}

impl FailureClass {
    /// Whether the failure is expected to resolve without user action
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::Transient)
    }

    pub fn from_remote(err: &RemoteStoreError) -> FailureClass {
        match err {
            RemoteStoreError::Network(_) | RemoteStoreError::Http(_) => FailureClass::Transient,
            RemoteStoreError::Server { status, .. } if *status >= 500 => FailureClass::Transient,
            RemoteStoreError::NotFound(_) => FailureClass::NotFound,
            RemoteStoreError::QuotaExceeded => FailureClass::QuotaExceeded,
            RemoteStoreError::Conflict => FailureClass::Conflict,
            _ => FailureClass::Other,
        }
    }
}

/// Events driving per-asset status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// Caller asked for the asset to be uploaded
    QueueRequested,
    /// An upload attempt claimed the asset
    UploadStarted,
    UploadSucceeded,
    UploadFailed(FailureClass),
    /// A download attempt claimed the asset
    DownloadStarted,
    DownloadSucceeded,
    DownloadFailed(FailureClass),
    /// Explicit user opt-out from sync
    OptOut,
}

/// Deterministic per-asset transition function.
///
/// `LocalOnly` is a terminal sink: only `OptOut` enters it and nothing
/// leaves it. Network-class upload failures route back to `Pending` so
/// they are silently retried when connectivity returns; every other
/// failure class lands in `Failed` and waits for explicit action.
pub fn next_status(current: MediaSyncStatus, event: SyncEvent) -> MediaSyncStatus {
    use MediaSyncStatus::*;

    match (current, event) {
        (_, SyncEvent::OptOut) => LocalOnly,
        (LocalOnly, _) => LocalOnly,

        (Synced, SyncEvent::QueueRequested) => Synced,
        (Failed, SyncEvent::QueueRequested) => Pending,
        (Pending, SyncEvent::QueueRequested) => Pending,
        (current, SyncEvent::QueueRequested) => current,

        (Pending, SyncEvent::UploadStarted) | (Failed, SyncEvent::UploadStarted) => Uploading,
        (current, SyncEvent::UploadStarted) => current,

        (Uploading, SyncEvent::UploadSucceeded) => Synced,
        (current, SyncEvent::UploadSucceeded) => current,

        (Uploading, SyncEvent::UploadFailed(class)) => {
            if class.is_retryable() {
                Pending
            } else {
                Failed
            }
        }
        (current, SyncEvent::UploadFailed(_)) => current,

        (Pending, SyncEvent::DownloadStarted)
        | (Synced, SyncEvent::DownloadStarted)
        | (Failed, SyncEvent::DownloadStarted) => Downloading,
        (current, SyncEvent::DownloadStarted) => current,

        (Downloading, SyncEvent::DownloadSucceeded) => Synced,
        (current, SyncEvent::DownloadSucceeded) => current,

        (Downloading, SyncEvent::DownloadFailed(_)) => Failed,
        (current, SyncEvent::DownloadFailed(_)) => current,
    }
}
