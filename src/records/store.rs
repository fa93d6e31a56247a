use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::models::{MemoryRecord, RecordChange};

#[derive(Error, Debug)]
pub enum RecordStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    RecordNotFound(Uuid),

    #[error("Record was deleted remotely: {0}")]
    RecordTombstoned(Uuid),

    #[error("Data directory not found")]
    DataDirNotFound,
}

pub type Result<T> = std::result::Result<T, RecordStoreError>;

/// Capacity of the change-notification channel
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// File-backed store of memory records, one JSON file per record.
///
/// This is the local materialization of the externally-replicated metadata.
/// The sync engine is its main writer; the replication layer applies remote
/// updates and deletions through `apply_remote_update` / `apply_remote_delete`.
pub struct RecordStore {
    base_path: PathBuf,
    changes: broadcast::Sender<RecordChange>,
}

impl RecordStore {
    pub fn new(base_path: PathBuf) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { base_path, changes }
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|p| p.join("memora"))
            .ok_or(RecordStoreError::DataDirNotFound)
    }

    /// Initialize storage directories
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.records_dir())?;
        Ok(())
    }

    fn records_dir(&self) -> PathBuf {
        self.base_path.join("records")
    }

    fn record_path(&self, record_id: Uuid) -> PathBuf {
        self.records_dir().join(format!("{}.json", record_id))
    }

    /// Subscribe to record change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.changes.subscribe()
    }

    /// Persist a newly created record
    pub fn insert(&self, record: &MemoryRecord) -> Result<()> {
        fs::create_dir_all(self.records_dir())?;
        let content = serde_json::to_string_pretty(record)?;
        fs::write(self.record_path(record.id), content)?;
        let _ = self.changes.send(RecordChange::Updated { record_id: record.id });
        Ok(())
    }

    /// Read a record, tombstoned or not
    pub fn get(&self, record_id: Uuid) -> Result<MemoryRecord> {
        let path = self.record_path(record_id);
        if !path.exists() {
            return Err(RecordStoreError::RecordNotFound(record_id));
        }
        let content = fs::read_to_string(&path)?;
        let record: MemoryRecord = serde_json::from_str(&content)?;
        Ok(record)
    }

    /// Read a record, failing if it has been tombstoned by remote deletion
    pub fn get_active(&self, record_id: Uuid) -> Result<MemoryRecord> {
        let record = self.get(record_id)?;
        if record.is_tombstoned() {
            return Err(RecordStoreError::RecordTombstoned(record_id));
        }
        Ok(record)
    }

    /// Write back a mutated record
    pub fn update(&self, record: &MemoryRecord) -> Result<()> {
        let path = self.record_path(record.id);
        if !path.exists() {
            return Err(RecordStoreError::RecordNotFound(record.id));
        }
        let content = serde_json::to_string_pretty(record)?;
        fs::write(&path, content)?;
        let _ = self.changes.send(RecordChange::Updated { record_id: record.id });
        Ok(())
    }

    /// List all records, newest first
    pub fn list(&self) -> Result<Vec<MemoryRecord>> {
        let dir = self.records_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<MemoryRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => {
                    log::warn!("Records: skipping unreadable file {:?}: {}", path, e);
                }
            }
        }

        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    /// List non-tombstoned records belonging to a profile
    pub fn list_by_profile(&self, profile_id: Uuid) -> Result<Vec<MemoryRecord>> {
        let records = self
            .list()?
            .into_iter()
            .filter(|r| r.profile_id == Some(profile_id) && !r.is_tombstoned())
            .collect();
        Ok(records)
    }

    /// Remove a record file entirely (local, user-driven deletion)
    pub fn delete(&self, record_id: Uuid) -> Result<()> {
        let path = self.record_path(record_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let _ = self.changes.send(RecordChange::Deleted { record_id });
        Ok(())
    }

    /// Apply a replicated update from another peer
    pub fn apply_remote_update(&self, record: &MemoryRecord) -> Result<()> {
        fs::create_dir_all(self.records_dir())?;
        let content = serde_json::to_string_pretty(record)?;
        fs::write(self.record_path(record.id), content)?;
        let _ = self.changes.send(RecordChange::Updated { record_id: record.id });
        Ok(())
    }

    /// Tombstone a record on behalf of the replication layer.
    ///
    /// The file is kept so in-flight transfers can observe the tombstone and
    /// abort safely instead of resurrecting the record.
    pub fn apply_remote_delete(&self, record_id: Uuid) -> Result<()> {
        let mut record = self.get(record_id)?;
        record.deleted_at = Some(Utc::now());
        record.updated_at = Utc::now();
        let content = serde_json::to_string_pretty(&record)?;
        fs::write(self.record_path(record_id), content)?;
        let _ = self.changes.send(RecordChange::Deleted { record_id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::models::MediaKind;
    use tempfile::TempDir;

    fn store() -> (TempDir, RecordStore) {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path().to_path_buf());
        store.init().unwrap();
        (dir, store)
    }

    #[test]
    fn test_insert_and_get() {
        let (_dir, store) = store();
        let record = MemoryRecord::new(MediaKind::Photo);
        store.insert(&record).unwrap();

        let loaded = store.get(record.id).unwrap();
        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.media_kind, MediaKind::Photo);
    }

    #[test]
    fn test_get_missing_record() {
        let (_dir, store) = store();
        let err = store.get(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, RecordStoreError::RecordNotFound(_)));
    }

    #[test]
    fn test_tombstoned_record_fails_active_read() {
        let (_dir, store) = store();
        let record = MemoryRecord::new(MediaKind::Video);
        store.insert(&record).unwrap();
        store.apply_remote_delete(record.id).unwrap();

        // Plain read still works; active read fails safely
        assert!(store.get(record.id).unwrap().is_tombstoned());
        let err = store.get_active(record.id).unwrap_err();
        assert!(matches!(err, RecordStoreError::RecordTombstoned(_)));
    }

    #[test]
    fn test_list_by_profile_skips_tombstoned() {
        let (_dir, store) = store();
        let profile_id = Uuid::new_v4();

        let mut a = MemoryRecord::new(MediaKind::Photo);
        a.profile_id = Some(profile_id);
        let mut b = MemoryRecord::new(MediaKind::Photo);
        b.profile_id = Some(profile_id);
        let mut c = MemoryRecord::new(MediaKind::Photo);
        c.profile_id = Some(Uuid::new_v4());

        store.insert(&a).unwrap();
        store.insert(&b).unwrap();
        store.insert(&c).unwrap();
        store.apply_remote_delete(b.id).unwrap();

        let listed = store.list_by_profile(profile_id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a.id);
    }

    #[test]
    fn test_change_events_emitted() {
        let (_dir, store) = store();
        let mut rx = store.subscribe();

        let record = MemoryRecord::new(MediaKind::Audio);
        store.insert(&record).unwrap();
        store.apply_remote_delete(record.id).unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            RecordChange::Updated { record_id } if record_id == record.id
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            RecordChange::Deleted { record_id } if record_id == record.id
        ));
    }
}
