//! Media asset synchronization engine for the Memora journal.
//!
//! Metadata records are replicated between devices by an external layer;
//! this crate moves the large binary payloads (photos, videos, audio,
//! thumbnails) those records reference, between a local blob store and a
//! remote asset store, under intermittent connectivity.

pub mod blob;
pub mod engine;
pub mod reachability;
pub mod records;
pub mod remote;
pub mod retry;
pub mod share;

pub use blob::{BlobKind, BlobStore, BlobStoreError};
pub use engine::{
    EngineConfig, EngineEvent, FailureClass, MediaSyncEngine, SharedRecords, SyncError,
    SyncOverview,
};
pub use reachability::{
    start_reachability_monitor, ConnectivityProbe, HttpProbe, ReachabilityConfig,
    ReachabilityMonitor,
};
pub use records::{
    MediaKind, MediaSyncStatus, MemoryRecord, RecordChange, RecordStore, RecordStoreError,
};
pub use remote::{
    AssetMetadata, HttpAssetStore, Partition, ProgressCallback, RemoteAssetStore,
    RemoteCredentials, RemoteStoreError,
};
pub use retry::{retry_with_backoff, RetryAction, RetryConfig};
pub use share::{ShareOutcome, SharedZoneCoordinator};
