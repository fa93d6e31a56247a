pub mod config;
pub mod events;
pub mod state;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

use crate::blob::{BlobKind, BlobStore, BlobStoreError};
use crate::records::{MediaSyncStatus, MemoryRecord, RecordStore, RecordStoreError};
use crate::remote::{
    no_progress, AssetMetadata, Partition, ProgressCallback, RemoteAssetStore, RemoteStoreError,
};
use crate::retry::{retry_with_backoff, RetryAction};

pub use config::EngineConfig;
pub use events::{EngineEvent, SyncOverview};
pub use state::{next_status, FailureClass, SyncEvent};

/// Type alias for the shared record store
pub type SharedRecords = Arc<Mutex<RecordStore>>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteStoreError),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobStoreError),

    #[error("Record store error: {0}")]
    Records(#[from] RecordStoreError),

    #[error("Record {0} does not carry media")]
    NotMedia(Uuid),

    #[error("Record {0} has no local media file")]
    LocalFileMissing(Uuid),

    #[error("Record {0} has no remote asset to download")]
    NoRemoteAsset(Uuid),

    #[error("A transfer for record {0} is already in flight")]
    TransferInFlight(Uuid),

    #[error("Transfer was cancelled before it started")]
    Cancelled,
}

/// Capacity of the engine event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferDirection {
    Upload,
    Download,
}

/// Ids with a transfer currently in flight, one slot per direction.
///
/// This set, not the stores, is the real per-asset concurrency guard: a
/// second attempt for the same id bounces off the claim instead of racing.
#[derive(Default)]
struct TransferClaims {
    uploads: HashSet<Uuid>,
    downloads: HashSet<Uuid>,
}

/// Releases the claim when the transfer attempt ends, however it ends
struct ClaimGuard {
    claims: Arc<Mutex<TransferClaims>>,
    record_id: Uuid,
    direction: TransferDirection,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let mut claims = self.claims.lock().unwrap();
        match self.direction {
            TransferDirection::Upload => claims.uploads.remove(&self.record_id),
            TransferDirection::Download => claims.downloads.remove(&self.record_id),
        };
    }
}

/// Hex-encoded SHA-256 over the exact bytes that will be uploaded
pub fn checksum_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

struct EngineInner {
    records: SharedRecords,
    blobs: Arc<BlobStore>,
    remote: Arc<dyn RemoteAssetStore>,
    config: EngineConfig,
    upload_slots: Semaphore,
    download_slots: Semaphore,
    claims: Arc<Mutex<TransferClaims>>,
    events: broadcast::Sender<EngineEvent>,
    network_available: AtomicBool,
    /// Bumped by cancel_all; queued work holding an older value abandons
    generation: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// Orchestrator for media asset transfers.
///
/// Holds its dependencies explicitly (record store, blob store, remote
/// store handle) so it can be constructed against fakes; there is no
/// process-wide shared instance. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct MediaSyncEngine {
    inner: Arc<EngineInner>,
}

impl MediaSyncEngine {
    pub fn new(
        records: SharedRecords,
        blobs: Arc<BlobStore>,
        remote: Arc<dyn RemoteAssetStore>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                upload_slots: Semaphore::new(config.max_concurrent_uploads),
                download_slots: Semaphore::new(config.max_concurrent_downloads),
                records,
                blobs,
                remote,
                config,
                claims: Arc::new(Mutex::new(TransferClaims::default())),
                events,
                network_available: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to engine state-change events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn network_available(&self) -> bool {
        self.inner.network_available.load(Ordering::SeqCst)
    }

    /// Update the connectivity flag; fed by the reachability monitor
    pub fn set_network_available(&self, available: bool) {
        let previous = self.inner.network_available.swap(available, Ordering::SeqCst);
        if previous != available {
            log::info!("Engine: network available = {}", available);
            let _ = self.inner.events.send(EngineEvent::NetworkAvailable { available });
        }
    }

    /// Queue a record for upload. Idempotent: already-synced, opted-out,
    /// text-only, and tombstoned records are left untouched.
    pub fn queue_upload(&self, record_id: Uuid) {
        let eligible = {
            let records = self.inner.records.lock().unwrap();
            match records.get_active(record_id) {
                Ok(record) => {
                    record.has_local_media() && !record.media_sync_status.is_upload_settled()
                }
                Err(e) => {
                    log::debug!("Queue: skipping record {}: {}", record_id, e);
                    false
                }
            }
        };
        if !eligible {
            return;
        }

        if let Err(e) = self.apply_record_event(record_id, SyncEvent::QueueRequested, |_| {}) {
            log::warn!("Queue: could not mark record {} pending: {}", record_id, e);
            return;
        }
        log::info!("Queue: record {} pending upload", record_id);

        if self.network_available() {
            let engine = self.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.upload_now(record_id).await {
                    log::debug!("Queue: immediate attempt for {} ended: {}", record_id, e);
                }
            });
        }
    }

    /// Perform a full upload attempt for a record's primary asset.
    ///
    /// No-ops for settled records and for ids that already have an upload
    /// in flight, so concurrent callers cannot create duplicate remote
    /// assets. Failures are written onto the record; the returned error is
    /// for synchronous callers only.
    pub async fn upload_now(&self, record_id: Uuid) -> Result<(), SyncError> {
        let record = {
            let records = self.inner.records.lock().unwrap();
            records.get_active(record_id)?
        };

        if !record.media_kind.carries_media() {
            log::debug!("Upload: record {} is text-only, nothing to sync", record_id);
            return Ok(());
        }
        if record.media_sync_status.is_upload_settled() {
            log::debug!(
                "Upload: record {} already {:?}, skipping",
                record_id,
                record.media_sync_status,
            );
            return Ok(());
        }

        let Some(_claim) = self.try_claim(record_id, TransferDirection::Upload) else {
            log::debug!("Upload: record {} already has an upload in flight", record_id);
            return Ok(());
        };

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let _permit = self
            .inner
            .upload_slots
            .acquire()
            .await
            .map_err(|_| SyncError::Cancelled)?;
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            log::debug!("Upload: record {} was cancelled while queued", record_id);
            return Err(SyncError::Cancelled);
        }

        self.run_upload(record_id).await
    }

    async fn run_upload(&self, record_id: Uuid) -> Result<(), SyncError> {
        let record = self.apply_record_event(record_id, SyncEvent::UploadStarted, |r| {
            r.last_sync_attempt = Some(Utc::now());
            r.upload_progress = 0.0;
            r.sync_error_message = None;
        })?;

        let kind = match BlobKind::for_media(record.media_kind) {
            Some(kind) => kind,
            None => return Err(SyncError::NotMedia(record_id)),
        };

        let (filename, bytes) = match self.load_primary_blob(&record, kind) {
            Ok(loaded) => loaded,
            Err(e @ SyncError::LocalFileMissing(_)) => {
                self.record_upload_failure(
                    record_id,
                    FailureClass::LocalFileMissing,
                    "local media file not found",
                );
                return Err(e);
            }
            Err(e) => {
                self.record_upload_failure(record_id, FailureClass::Other, &e.to_string());
                return Err(e);
            }
        };

        let byte_size = bytes.len() as u64;
        let metadata = AssetMetadata {
            owner_record_id: record_id,
            kind,
            byte_size,
            checksum: checksum_hex(&bytes),
            original_filename: Some(filename),
        };

        log::info!("Upload: starting record {} ({} bytes)", record_id, byte_size);

        let progress = self.progress_callback(record_id);
        let result = retry_with_backoff(
            &self.inner.config.retry,
            |e: &RemoteStoreError| {
                if FailureClass::from_remote(e).is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || {
                let bytes = bytes.clone();
                let metadata = metadata.clone();
                let progress = Arc::clone(&progress);
                async move {
                    // A fresh attempt restarts progress from zero
                    self.reset_progress(record_id);
                    self.inner
                        .remote
                        .create_asset(bytes, &metadata, &Partition::Private, progress)
                        .await
                }
            },
        )
        .await;

        match result {
            Ok(asset_id) => {
                let record = self.apply_record_event(record_id, SyncEvent::UploadSucceeded, |r| {
                    r.remote_asset_id = Some(asset_id.clone());
                    r.upload_progress = 1.0;
                    if r.media_byte_size == 0 {
                        r.media_byte_size = byte_size as i64;
                    }
                })?;
                let _ = self.inner.events.send(EngineEvent::UploadProgress {
                    record_id,
                    fraction: 1.0,
                });
                log::info!("Upload: record {} synced as {}", record_id, asset_id);

                // Secondary transfer; its failure never rolls back Synced
                self.upload_thumbnail(&record, &Partition::Private).await;
                Ok(())
            }
            Err(e) => {
                let class = FailureClass::from_remote(&e);
                self.record_upload_failure(record_id, class, &e.to_string());
                Err(e.into())
            }
        }
    }

    /// Upload an asset into a shared zone, recording the per-partition id.
    ///
    /// Does not touch `media_sync_status`: the private-zone state machine
    /// stays authoritative for the primary copy.
    pub(crate) async fn push_to_zone(&self, record_id: Uuid, zone: &str) -> Result<(), SyncError> {
        let record = {
            let records = self.inner.records.lock().unwrap();
            records.get_active(record_id)?
        };

        let kind = match BlobKind::for_media(record.media_kind) {
            Some(kind) => kind,
            None => return Err(SyncError::NotMedia(record_id)),
        };
        if record.shared_asset_id.is_some() {
            log::debug!("Share: record {} already in zone, skipping", record_id);
            return Ok(());
        }

        let Some(_claim) = self.try_claim(record_id, TransferDirection::Upload) else {
            return Err(SyncError::TransferInFlight(record_id));
        };

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let _permit = self
            .inner
            .upload_slots
            .acquire()
            .await
            .map_err(|_| SyncError::Cancelled)?;
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            return Err(SyncError::Cancelled);
        }

        let (filename, bytes) = self.load_primary_blob(&record, kind)?;
        let metadata = AssetMetadata {
            owner_record_id: record_id,
            kind,
            byte_size: bytes.len() as u64,
            checksum: checksum_hex(&bytes),
            original_filename: Some(filename),
        };
        let partition = Partition::Shared {
            zone: zone.to_string(),
        };

        let result = retry_with_backoff(
            &self.inner.config.retry,
            |e: &RemoteStoreError| {
                if FailureClass::from_remote(e).is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || {
                let bytes = bytes.clone();
                let metadata = metadata.clone();
                let partition = partition.clone();
                async move {
                    self.inner
                        .remote
                        .create_asset(bytes, &metadata, &partition, no_progress())
                        .await
                }
            },
        )
        .await;

        match result {
            Ok(asset_id) => {
                let record = self.mutate_record(record_id, |r| {
                    r.shared_asset_id = Some(asset_id.clone());
                    r.shared_zone = Some(zone.to_string());
                })?;
                log::info!(
                    "Share: record {} pushed to zone {} as {}",
                    record_id,
                    zone,
                    asset_id,
                );
                self.upload_thumbnail(&record, &partition).await;
                Ok(())
            }
            Err(e) => {
                log::error!("Share: record {} push to zone {} failed: {}", record_id, zone, e);
                Err(e.into())
            }
        }
    }

    /// Resolve an asset to a local path, downloading only when necessary.
    ///
    /// The local-file check is the fast path and always runs first; no
    /// network call happens when the blob is already on disk.
    pub async fn download_if_needed(&self, record_id: Uuid) -> Result<PathBuf, SyncError> {
        let record = {
            let records = self.inner.records.lock().unwrap();
            records.get_active(record_id)?
        };

        let kind = match BlobKind::for_media(record.media_kind) {
            Some(kind) => kind,
            None => return Err(SyncError::NotMedia(record_id)),
        };

        if let Some(filename) = &record.local_blob_path {
            if self.inner.blobs.exists(filename, kind) {
                return Ok(self.inner.blobs.path_for(filename, kind));
            }
        }

        let (asset_id, partition) = match &record.owner_partition {
            Partition::Private => (
                record
                    .remote_asset_id
                    .clone()
                    .ok_or(SyncError::NoRemoteAsset(record_id))?,
                Partition::Private,
            ),
            shared @ Partition::Shared { .. } => {
                // Participants resolve through the shared zone; the private
                // id is a fallback for the owner's own devices
                let id = record
                    .shared_asset_id
                    .clone()
                    .or_else(|| record.remote_asset_id.clone())
                    .ok_or(SyncError::NoRemoteAsset(record_id))?;
                (id, shared.clone())
            }
        };

        let Some(_claim) = self.try_claim(record_id, TransferDirection::Download) else {
            log::debug!("Download: record {} already has a download in flight", record_id);
            return Err(SyncError::TransferInFlight(record_id));
        };

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let _permit = self
            .inner
            .download_slots
            .acquire()
            .await
            .map_err(|_| SyncError::Cancelled)?;
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            return Err(SyncError::Cancelled);
        }

        self.apply_record_event(record_id, SyncEvent::DownloadStarted, |r| {
            r.last_sync_attempt = Some(Utc::now());
            r.sync_error_message = None;
        })?;

        log::info!("Download: fetching asset {} for record {}", asset_id, record_id);

        match self.inner.remote.fetch_asset(&asset_id, &partition).await {
            Ok(bytes) => {
                let filename = record
                    .local_blob_path
                    .clone()
                    .unwrap_or_else(|| format!("{}.{}", record_id, kind.extension()));
                if let Err(e) = self.inner.blobs.save_named(&bytes, kind, &filename) {
                    self.record_download_failure(record_id, FailureClass::Other, &e.to_string());
                    return Err(e.into());
                }
                let byte_size = bytes.len() as i64;
                self.apply_record_event(record_id, SyncEvent::DownloadSucceeded, |r| {
                    r.local_blob_path = Some(filename.clone());
                    if r.media_byte_size == 0 {
                        r.media_byte_size = byte_size;
                    }
                })?;
                log::info!("Download: record {} saved as {}", record_id, filename);
                Ok(self.inner.blobs.path_for(&filename, kind))
            }
            Err(RemoteStoreError::NotFound(_)) => {
                // Stale reference: the asset is gone remotely. Clear the id
                // so a local copy, if one appears, can be re-uploaded.
                let message = format!("remote asset {} not found", asset_id);
                let cleared_partition = partition.clone();
                let result = self.apply_record_event(
                    record_id,
                    SyncEvent::DownloadFailed(FailureClass::NotFound),
                    |r| {
                        r.sync_error_message = Some(message.clone());
                        r.last_sync_attempt = Some(Utc::now());
                        match cleared_partition {
                            Partition::Private => r.remote_asset_id = None,
                            Partition::Shared { .. } => r.shared_asset_id = None,
                        }
                    },
                );
                if let Err(e) = result {
                    log::warn!("Download: could not record failure for {}: {}", record_id, e);
                }
                self.note_failure(record_id, &message);
                log::error!("Download: {}", message);
                Err(RemoteStoreError::NotFound(asset_id).into())
            }
            Err(e) => {
                let class = FailureClass::from_remote(&e);
                self.record_download_failure(record_id, class, &e.to_string());
                Err(e.into())
            }
        }
    }

    /// Re-invoke upload for every record still waiting or failed.
    ///
    /// Triggered by reachability restore and by explicit user action.
    /// Terminal-class failures are attempted too; they stay `Failed` for
    /// as long as the remote condition persists.
    pub async fn retry_failed_and_pending(&self) -> usize {
        let candidates: Vec<Uuid> = {
            let records = self.inner.records.lock().unwrap();
            match records.list() {
                Ok(list) => list
                    .into_iter()
                    .filter(|r| !r.is_tombstoned())
                    .filter(|r| {
                        matches!(
                            r.media_sync_status,
                            MediaSyncStatus::Pending | MediaSyncStatus::Failed
                        )
                    })
                    .filter(|r| r.has_local_media())
                    .map(|r| r.id)
                    .collect(),
                Err(e) => {
                    log::error!("Retry: could not list records: {}", e);
                    return 0;
                }
            }
        };

        if candidates.is_empty() {
            return 0;
        }
        log::info!("Retry: attempting {} queued records", candidates.len());

        let mut attempted = 0;
        for record_id in candidates {
            attempted += 1;
            if let Err(e) = self.upload_now(record_id).await {
                log::debug!("Retry: record {} attempt ended: {}", record_id, e);
            }
        }
        attempted
    }

    /// Abandon transfers still waiting for a slot. In-flight network calls
    /// run to completion and apply their result normally.
    pub fn cancel_all(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        log::info!("Engine: cancelled queued transfers; in-flight transfers will complete");
    }

    /// Explicit opt-out: the asset will never be synced
    pub fn opt_out_local_only(&self, record_id: Uuid) -> Result<(), SyncError> {
        self.apply_record_event(record_id, SyncEvent::OptOut, |_| {})?;
        log::info!("Engine: record {} opted out of sync", record_id);
        Ok(())
    }

    /// Best-effort remote cleanup for a record about to be deleted.
    ///
    /// Failures are logged and the corresponding id kept, so a later
    /// deletion pass can retry.
    pub async fn delete_remote_assets(&self, record_id: Uuid) -> Result<(), SyncError> {
        let record = {
            let records = self.inner.records.lock().unwrap();
            records.get(record_id)?
        };

        let shared_partition = record
            .shared_zone
            .clone()
            .map(|zone| Partition::Shared { zone });

        let mut clear_asset = false;
        let mut clear_thumbnail = false;
        let mut clear_shared_asset = false;
        let mut clear_shared_thumbnail = false;

        if let Some(id) = &record.remote_asset_id {
            clear_asset = self.try_delete_remote(id, &Partition::Private).await;
        }
        if let Some(id) = &record.remote_thumbnail_id {
            clear_thumbnail = self.try_delete_remote(id, &Partition::Private).await;
        }
        if let Some(partition) = &shared_partition {
            if let Some(id) = &record.shared_asset_id {
                clear_shared_asset = self.try_delete_remote(id, partition).await;
            }
            if let Some(id) = &record.shared_thumbnail_id {
                clear_shared_thumbnail = self.try_delete_remote(id, partition).await;
            }
        }

        self.mutate_record(record_id, |r| {
            if clear_asset {
                r.remote_asset_id = None;
            }
            if clear_thumbnail {
                r.remote_thumbnail_id = None;
            }
            if clear_shared_asset {
                r.shared_asset_id = None;
            }
            if clear_shared_thumbnail {
                r.shared_thumbnail_id = None;
            }
            if r.shared_asset_id.is_none() && r.shared_thumbnail_id.is_none() {
                r.shared_zone = None;
            }
        })?;
        Ok(())
    }

    /// User-driven deletion: remote cleanup, then local files, then the
    /// record itself
    pub async fn delete_record(&self, record_id: Uuid) -> Result<(), SyncError> {
        self.delete_remote_assets(record_id).await?;

        let record = {
            let records = self.inner.records.lock().unwrap();
            records.get(record_id)?
        };
        if let Some(kind) = BlobKind::for_media(record.media_kind) {
            if let Some(filename) = &record.local_blob_path {
                if let Err(e) = self.inner.blobs.delete(filename, kind) {
                    log::warn!("Delete: could not remove local blob {}: {}", filename, e);
                }
            }
        }
        if let Some(filename) = &record.local_thumbnail_path {
            if let Err(e) = self.inner.blobs.delete(filename, BlobKind::Thumbnail) {
                log::warn!("Delete: could not remove local thumbnail {}: {}", filename, e);
            }
        }

        let records = self.inner.records.lock().unwrap();
        records.delete(record_id)?;
        Ok(())
    }

    /// Snapshot of observable state for status displays
    pub fn overview(&self) -> SyncOverview {
        let (pending, failed) = {
            let records = self.inner.records.lock().unwrap();
            match records.list() {
                Ok(list) => {
                    let pending = list
                        .iter()
                        .filter(|r| !r.is_tombstoned())
                        .filter(|r| r.media_sync_status == MediaSyncStatus::Pending)
                        .count();
                    let failed = list
                        .iter()
                        .filter(|r| !r.is_tombstoned())
                        .filter(|r| r.media_sync_status == MediaSyncStatus::Failed)
                        .count();
                    (pending, failed)
                }
                Err(_) => (0, 0),
            }
        };
        let (in_flight_uploads, in_flight_downloads) = {
            let claims = self.inner.claims.lock().unwrap();
            (claims.uploads.len(), claims.downloads.len())
        };
        SyncOverview {
            pending_uploads: pending,
            failed,
            in_flight_uploads,
            in_flight_downloads,
            network_available: self.network_available(),
            last_error: self.inner.last_error.lock().unwrap().clone(),
        }
    }

    // ===== Internals =====

    fn try_claim(&self, record_id: Uuid, direction: TransferDirection) -> Option<ClaimGuard> {
        let mut claims = self.inner.claims.lock().unwrap();
        let set = match direction {
            TransferDirection::Upload => &mut claims.uploads,
            TransferDirection::Download => &mut claims.downloads,
        };
        if !set.insert(record_id) {
            return None;
        }
        Some(ClaimGuard {
            claims: Arc::clone(&self.inner.claims),
            record_id,
            direction,
        })
    }

    fn load_primary_blob(
        &self,
        record: &MemoryRecord,
        kind: BlobKind,
    ) -> Result<(String, Bytes), SyncError> {
        let filename = record
            .local_blob_path
            .clone()
            .ok_or(SyncError::LocalFileMissing(record.id))?;
        match self.inner.blobs.load(&filename, kind) {
            Ok(bytes) => Ok((filename, Bytes::from(bytes))),
            Err(BlobStoreError::NotFound(_)) => Err(SyncError::LocalFileMissing(record.id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a state-machine event plus any field mutations, persisting the
    /// record and notifying observers. Short lock, no I/O awaits inside.
    fn apply_record_event<F>(
        &self,
        record_id: Uuid,
        event: SyncEvent,
        f: F,
    ) -> Result<MemoryRecord, SyncError>
    where
        F: FnOnce(&mut MemoryRecord),
    {
        let (record, changed) = {
            let records = self.inner.records.lock().unwrap();
            let mut r = records.get_active(record_id)?;
            let next = next_status(r.media_sync_status, event);
            let changed = next != r.media_sync_status;
            r.media_sync_status = next;
            f(&mut r);
            r.updated_at = Utc::now();
            records.update(&r)?;
            (r, changed)
        };
        if changed {
            let _ = self.inner.events.send(EngineEvent::StatusChanged {
                record_id,
                status: record.media_sync_status,
            });
        }
        Ok(record)
    }

    /// Field-only mutation without a state-machine event
    fn mutate_record<F>(&self, record_id: Uuid, f: F) -> Result<MemoryRecord, SyncError>
    where
        F: FnOnce(&mut MemoryRecord),
    {
        let record = {
            let records = self.inner.records.lock().unwrap();
            let mut r = records.get(record_id)?;
            f(&mut r);
            r.updated_at = Utc::now();
            records.update(&r)?;
            r
        };
        Ok(record)
    }

    fn record_upload_failure(&self, record_id: Uuid, class: FailureClass, message: &str) {
        let result = self.apply_record_event(record_id, SyncEvent::UploadFailed(class), |r| {
            r.sync_error_message = Some(message.to_string());
            r.last_sync_attempt = Some(Utc::now());
        });
        if let Err(e) = result {
            log::warn!("Upload: could not record failure for {}: {}", record_id, e);
        }
        self.note_failure(record_id, message);
        log::error!("Upload: record {} failed ({:?}): {}", record_id, class, message);
    }

    fn record_download_failure(&self, record_id: Uuid, class: FailureClass, message: &str) {
        let result = self.apply_record_event(record_id, SyncEvent::DownloadFailed(class), |r| {
            r.sync_error_message = Some(message.to_string());
            r.last_sync_attempt = Some(Utc::now());
        });
        if let Err(e) = result {
            log::warn!("Download: could not record failure for {}: {}", record_id, e);
        }
        self.note_failure(record_id, message);
        log::error!("Download: record {} failed ({:?}): {}", record_id, class, message);
    }

    fn note_failure(&self, record_id: Uuid, message: &str) {
        {
            let mut last_error = self.inner.last_error.lock().unwrap();
            *last_error = Some(message.to_string());
        }
        let _ = self.inner.events.send(EngineEvent::TransferFailed {
            record_id,
            message: message.to_string(),
        });
    }

    /// Best-effort thumbnail transfer; never fails the primary outcome
    async fn upload_thumbnail(&self, record: &MemoryRecord, partition: &Partition) {
        let Some(filename) = record.local_thumbnail_path.clone() else {
            return;
        };
        let already_uploaded = match partition {
            Partition::Private => record.remote_thumbnail_id.is_some(),
            Partition::Shared { .. } => record.shared_thumbnail_id.is_some(),
        };
        if already_uploaded {
            return;
        }

        let bytes = match self.inner.blobs.load(&filename, BlobKind::Thumbnail) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                log::warn!(
                    "Upload: thumbnail {} for record {} unreadable, skipping: {}",
                    filename,
                    record.id,
                    e,
                );
                self.mark_thumbnail_failed(record.id);
                return;
            }
        };

        let metadata = AssetMetadata {
            owner_record_id: record.id,
            kind: BlobKind::Thumbnail,
            byte_size: bytes.len() as u64,
            checksum: checksum_hex(&bytes),
            original_filename: Some(filename),
        };

        match self
            .inner
            .remote
            .create_asset(bytes, &metadata, partition, no_progress())
            .await
        {
            Ok(thumbnail_id) => {
                let update = self.mutate_record(record.id, |r| {
                    match partition {
                        Partition::Private => r.remote_thumbnail_id = Some(thumbnail_id.clone()),
                        Partition::Shared { .. } => {
                            r.shared_thumbnail_id = Some(thumbnail_id.clone())
                        }
                    }
                    r.thumbnail_sync_status = MediaSyncStatus::Synced;
                });
                if let Err(e) = update {
                    log::warn!("Upload: could not store thumbnail id for {}: {}", record.id, e);
                }
            }
            Err(e) => {
                log::warn!("Upload: thumbnail for record {} failed (non-fatal): {}", record.id, e);
                self.mark_thumbnail_failed(record.id);
            }
        }
    }

    fn mark_thumbnail_failed(&self, record_id: Uuid) {
        let result = self.mutate_record(record_id, |r| {
            r.thumbnail_sync_status = MediaSyncStatus::Failed;
        });
        if let Err(e) = result {
            log::debug!("Upload: could not mark thumbnail failed for {}: {}", record_id, e);
        }
    }

    async fn try_delete_remote(&self, asset_id: &str, partition: &Partition) -> bool {
        match self.inner.remote.delete_asset(asset_id, partition).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Delete: could not remove remote asset {}: {}", asset_id, e);
                false
            }
        }
    }

    fn progress_callback(&self, record_id: Uuid) -> ProgressCallback {
        let records = Arc::clone(&self.inner.records);
        let events = self.inner.events.clone();
        let step = self.inner.config.progress_persist_step;
        Arc::new(move |transferred, total| {
            let fraction = if total == 0 {
                1.0
            } else {
                (transferred as f64 / total as f64).min(1.0) as f32
            };
            let mut observed = fraction;
            {
                let records = records.lock().unwrap();
                if let Ok(mut record) = records.get(record_id) {
                    if fraction < record.upload_progress {
                        // Never report backwards within an attempt
                        observed = record.upload_progress;
                    } else if fraction - record.upload_progress >= step
                        || (fraction >= 1.0 && record.upload_progress < 1.0)
                    {
                        record.upload_progress = fraction;
                        if let Err(e) = records.update(&record) {
                            log::debug!("Upload: progress persist for {} failed: {}", record_id, e);
                        }
                    }
                }
            }
            let _ = events.send(EngineEvent::UploadProgress {
                record_id,
                fraction: observed,
            });
        })
    }

    fn reset_progress(&self, record_id: Uuid) {
        let records = self.inner.records.lock().unwrap();
        if let Ok(mut record) = records.get(record_id) {
            if record.upload_progress != 0.0 {
                record.upload_progress = 0.0;
                if let Err(e) = records.update(&record) {
                    log::debug!("Upload: progress reset for {} failed: {}", record_id, e);
                }
            }
        }
    }
}
