mod models;
mod store;

pub use models::{MediaKind, MediaSyncStatus, MemoryRecord, RecordChange};
pub use store::{RecordStore, RecordStoreError};
