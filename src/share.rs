use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::engine::{MediaSyncEngine, SharedRecords, SyncError};

/// Result of sharing a profile's assets into a zone
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShareOutcome {
    /// Assets newly pushed into the shared zone
    pub assets_shared: usize,
    /// Records skipped: text-only, no media, or already shared
    pub skipped: usize,
    /// Records whose tag relationships were detached around the share
    pub tags_detached: usize,
}

/// Pushes an owner's existing assets into a shared zone so participants
/// can resolve them.
///
/// Tag relationships are globally shared and also referenced by records
/// outside the profile; assigning them to two partitions at once is
/// rejected by the record replication layer. The coordinator therefore
/// runs a three-phase protocol: detach tags from the affected records and
/// persist that, push assets into the zone, then restore the tags onto the
/// private-partition records only. A failed push rolls the detachment back
/// before returning.
pub struct SharedZoneCoordinator {
    engine: MediaSyncEngine,
    records: SharedRecords,
}

impl SharedZoneCoordinator {
    pub fn new(engine: MediaSyncEngine, records: SharedRecords) -> Self {
        Self { engine, records }
    }

    /// Share every asset under a profile into the given zone.
    ///
    /// Repeatable: records whose shared-zone id is already set are skipped,
    /// so re-running after a partial failure only pushes what is missing.
    pub async fn share_profile(
        &self,
        profile_id: Uuid,
        zone: &str,
    ) -> Result<ShareOutcome, SyncError> {
        let affected: Vec<_> = {
            let records = self.records.lock().unwrap();
            records.list_by_profile(profile_id)?
        };

        if affected.is_empty() {
            log::info!("Share: profile {} has no records, nothing to do", profile_id);
            return Ok(ShareOutcome::default());
        }

        log::info!(
            "Share: profile {} -> zone {} ({} records)",
            profile_id,
            zone,
            affected.len(),
        );

        // Phase 1: detach tag relationships and persist the detachment
        let detached = self.detach_tags(&affected)?;

        // Phase 2: push assets into the shared zone
        let push_result = self.push_assets(&affected, zone).await;

        match push_result {
            Ok(mut outcome) => {
                // Phase 3: restore tags onto the private-partition records
                self.reattach_tags(&detached);
                outcome.tags_detached = detached.len();
                log::info!(
                    "Share: profile {} complete ({} shared, {} skipped)",
                    profile_id,
                    outcome.assets_shared,
                    outcome.skipped,
                );
                Ok(outcome)
            }
            Err(e) => {
                // Roll back so local state matches the pre-share state
                log::error!(
                    "Share: profile {} failed, rolling back tag detachment: {}",
                    profile_id,
                    e,
                );
                self.reattach_tags(&detached);
                Err(e)
            }
        }
    }

    /// Best-effort removal of a profile's assets from a shared zone
    pub async fn unshare_profile(&self, profile_id: Uuid, zone: &str) -> Result<usize, SyncError> {
        let affected: Vec<_> = {
            let records = self.records.lock().unwrap();
            records.list_by_profile(profile_id)?
        };

        let mut removed = 0;
        for record in &affected {
            if record.shared_zone.as_deref() != Some(zone) {
                continue;
            }
            if record.shared_asset_id.is_none() && record.shared_thumbnail_id.is_none() {
                continue;
            }
            self.engine.delete_remote_assets(record.id).await?;
            removed += 1;
        }
        log::info!(
            "Share: profile {} removed from zone {} ({} records)",
            profile_id,
            zone,
            removed,
        );
        Ok(removed)
    }

    fn detach_tags(
        &self,
        affected: &[crate::records::MemoryRecord],
    ) -> Result<HashMap<Uuid, Vec<Uuid>>, SyncError> {
        let mut detached = HashMap::new();
        let records = self.records.lock().unwrap();
        for record in affected {
            if record.tags.is_empty() {
                continue;
            }
            let result = records.get_active(record.id).and_then(|mut updated| {
                let tags = std::mem::take(&mut updated.tags);
                updated.updated_at = chrono::Utc::now();
                records.update(&updated).map(|_| tags)
            });
            match result {
                Ok(tags) => {
                    detached.insert(record.id, tags);
                }
                Err(e) => {
                    // A partial detachment must not outlive a failed share
                    Self::restore_tags(&records, &detached);
                    return Err(e.into());
                }
            }
        }
        log::info!("Share: detached tags from {} records", detached.len());
        Ok(detached)
    }

    /// Restore detached tags. Used for both the success path and rollback;
    /// records deleted mid-share are skipped with a warning.
    fn reattach_tags(&self, detached: &HashMap<Uuid, Vec<Uuid>>) {
        let records = self.records.lock().unwrap();
        Self::restore_tags(&records, detached);
    }

    fn restore_tags(
        records: &crate::records::RecordStore,
        detached: &HashMap<Uuid, Vec<Uuid>>,
    ) {
        for (record_id, tags) in detached {
            match records.get(*record_id) {
                Ok(mut record) => {
                    record.tags = tags.clone();
                    record.updated_at = chrono::Utc::now();
                    if let Err(e) = records.update(&record) {
                        log::warn!("Share: could not reattach tags to {}: {}", record_id, e);
                    }
                }
                Err(e) => {
                    log::warn!("Share: could not reattach tags to {}: {}", record_id, e);
                }
            }
        }
    }

    async fn push_assets(
        &self,
        affected: &[crate::records::MemoryRecord],
        zone: &str,
    ) -> Result<ShareOutcome, SyncError> {
        let mut outcome = ShareOutcome::default();
        for record in affected {
            if !record.has_local_media() {
                outcome.skipped += 1;
                continue;
            }
            if record.shared_asset_id.is_some() {
                outcome.skipped += 1;
                continue;
            }
            self.engine.push_to_zone(record.id, zone).await?;
            outcome.assets_shared += 1;
        }
        Ok(outcome)
    }
}
