//! Publisher and subscriber tracking tables.
//!
//! One record per entity UUID holds the syndication status and the last
//! known content hash. A null hash means the next export or import must not
//! be skipped.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use syndic_cdf::{SiteRole, TrackingStatus};
use tracing::{debug, warn};
use uuid::Uuid;

/// Current time in unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A tracking table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    /// Local entity type.
    pub entity_type: String,
    /// Local entity id.
    pub entity_id: Option<u64>,
    /// Entity UUID (unique key).
    pub entity_uuid: Uuid,
    /// Syndication status.
    pub status: TrackingStatus,
    /// Last known content hash.
    pub hash: Option<String>,
    /// Id of the live work item, if any.
    pub queue_id: Option<String>,
    /// Creation time (unix ms).
    pub created: u64,
    /// Last modification time (unix ms).
    pub modified: u64,
}

impl TrackingRecord {
    /// Creates a record with the given status.
    pub fn new(entity_type: impl Into<String>, entity_uuid: Uuid, status: TrackingStatus) -> Self {
        let now = now_millis();
        Self {
            entity_type: entity_type.into(),
            entity_id: None,
            entity_uuid,
            status,
            hash: None,
            queue_id: None,
            created: now,
            modified: now,
        }
    }
}

/// Filter for listing and bulk updates. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingFilter {
    /// Accepted statuses.
    pub statuses: Vec<TrackingStatus>,
    /// Accepted entity types.
    pub entity_types: Vec<String>,
}

impl TrackingFilter {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches records with one status.
    pub fn status(status: TrackingStatus) -> Self {
        Self {
            statuses: vec![status],
            entity_types: Vec::new(),
        }
    }

    /// Matches records with any of the statuses.
    pub fn statuses(statuses: &[TrackingStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            entity_types: Vec::new(),
        }
    }

    /// Restricts to one entity type.
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_types.push(entity_type.into());
        self
    }

    /// Returns true if the record passes the filter.
    pub fn matches(&self, record: &TrackingRecord) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&record.status))
            && (self.entity_types.is_empty() || self.entity_types.contains(&record.entity_type))
    }
}

/// Storage contract for tracking tables.
///
/// Every mutation is a single-row upsert keyed by UUID.
pub trait TrackingStore: Send + Sync {
    /// Gets a record by UUID.
    fn get(&self, uuid: &Uuid) -> SyncResult<Option<TrackingRecord>>;

    /// Inserts or replaces a record.
    fn upsert(&self, record: TrackingRecord) -> SyncResult<()>;

    /// Deletes a record. Returns false if it did not exist.
    fn delete(&self, uuid: &Uuid) -> SyncResult<bool>;

    /// Lists matching records ordered by UUID.
    fn list(&self, filter: &TrackingFilter) -> SyncResult<Vec<TrackingRecord>>;

    /// Clears the hash of every matching record without changing its status.
    fn nullify_hashes(&self, filter: &TrackingFilter) -> SyncResult<usize> {
        let mut count = 0;
        for mut record in self.list(filter)? {
            if record.hash.take().is_some() {
                record.modified = now_millis();
                self.upsert(record)?;
                count += 1;
            }
        }
        Ok(count)
    }
}

/// In-memory tracking store.
#[derive(Debug, Default)]
pub struct MemoryTrackingStore {
    records: RwLock<BTreeMap<Uuid, TrackingRecord>>,
}

impl MemoryTrackingStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl TrackingStore for MemoryTrackingStore {
    fn get(&self, uuid: &Uuid) -> SyncResult<Option<TrackingRecord>> {
        Ok(self.records.read().get(uuid).cloned())
    }

    fn upsert(&self, record: TrackingRecord) -> SyncResult<()> {
        self.records.write().insert(record.entity_uuid, record);
        Ok(())
    }

    fn delete(&self, uuid: &Uuid) -> SyncResult<bool> {
        Ok(self.records.write().remove(uuid).is_some())
    }

    fn list(&self, filter: &TrackingFilter) -> SyncResult<Vec<TrackingRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn nullify_hashes(&self, filter: &TrackingFilter) -> SyncResult<usize> {
        let now = now_millis();
        let mut count = 0;
        for record in self.records.write().values_mut() {
            if filter.matches(record) && record.hash.take().is_some() {
                record.modified = now;
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Role-checked operations shared by both trackers.
#[derive(Clone)]
struct Tracker {
    role: SiteRole,
    store: Arc<dyn TrackingStore>,
}

impl Tracker {
    fn allows(&self, status: TrackingStatus) -> bool {
        match self.role {
            SiteRole::Publisher => status.is_publisher_status(),
            SiteRole::Subscriber => status.is_subscriber_status(),
        }
    }

    fn transition(
        &self,
        entity_type: &str,
        entity_id: Option<u64>,
        uuid: Uuid,
        to: TrackingStatus,
        update: impl FnOnce(&mut TrackingRecord),
    ) -> SyncResult<TrackingRecord> {
        let mut record = match self.store.get(&uuid)? {
            Some(existing) => {
                if !self.allows(existing.status) || !self.allows(to) {
                    return Err(SyncError::InvalidStateTransition {
                        from: existing.status.to_string(),
                        to: to.to_string(),
                    });
                }
                existing
            }
            None => {
                if !self.allows(to) {
                    return Err(SyncError::InvalidStateTransition {
                        from: "untracked".into(),
                        to: to.to_string(),
                    });
                }
                TrackingRecord::new(entity_type, uuid, to)
            }
        };
        record.entity_type = entity_type.to_string();
        if entity_id.is_some() {
            record.entity_id = entity_id;
        }
        record.status = to;
        record.modified = now_millis();
        update(&mut record);
        self.store.upsert(record.clone())?;
        debug!(uuid = %uuid, status = %to, role = ?self.role, "Tracking record updated");
        Ok(record)
    }

    fn get(&self, uuid: &Uuid) -> SyncResult<Option<TrackingRecord>> {
        self.store.get(uuid)
    }

    fn nullify_hash(&self, uuid: &Uuid) -> SyncResult<bool> {
        match self.store.get(uuid)? {
            Some(mut record) => {
                record.hash = None;
                record.modified = now_millis();
                self.store.upsert(record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_by_status(
        &self,
        status: TrackingStatus,
        entity_type: Option<&str>,
    ) -> SyncResult<Vec<TrackingRecord>> {
        let mut filter = TrackingFilter::status(status);
        if let Some(entity_type) = entity_type {
            filter = filter.with_entity_type(entity_type);
        }
        self.store.list(&filter)
    }
}

/// Tracks entities this repository publishes.
///
/// `QUEUED → EXPORTED → CONFIRMED`; any state may return to `QUEUED`.
#[derive(Clone)]
pub struct PublisherTracker {
    inner: Tracker,
}

impl PublisherTracker {
    /// Creates a publisher tracker over a store.
    pub fn new(store: Arc<dyn TrackingStore>) -> Self {
        Self {
            inner: Tracker {
                role: SiteRole::Publisher,
                store,
            },
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.inner.store
    }

    /// Gets a record.
    pub fn get(&self, uuid: &Uuid) -> SyncResult<Option<TrackingRecord>> {
        self.inner.get(uuid)
    }

    /// Returns the last exported hash.
    pub fn get_hash(&self, uuid: &Uuid) -> SyncResult<Option<String>> {
        Ok(self.inner.get(uuid)?.and_then(|r| r.hash))
    }

    /// Marks an entity as queued for export, keeping its last hash.
    pub fn track_queued(
        &self,
        entity_type: &str,
        entity_id: Option<u64>,
        uuid: Uuid,
    ) -> SyncResult<TrackingRecord> {
        self.inner
            .transition(entity_type, entity_id, uuid, TrackingStatus::Queued, |r| {
                r.queue_id = None;
            })
    }

    /// Stores the id of the work item created for a queued record.
    pub fn set_queue_id(&self, uuid: &Uuid, queue_id: impl Into<String>) -> SyncResult<bool> {
        match self.inner.get(uuid)? {
            Some(mut record) => {
                record.queue_id = Some(queue_id.into());
                record.modified = now_millis();
                self.inner.store.upsert(record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Marks an entity as exported with the hash that was sent.
    pub fn track_exported(
        &self,
        entity_type: &str,
        entity_id: Option<u64>,
        uuid: Uuid,
        hash: impl Into<String>,
    ) -> SyncResult<TrackingRecord> {
        let hash = hash.into();
        self.inner
            .transition(entity_type, entity_id, uuid, TrackingStatus::Exported, |r| {
                r.hash = Some(hash);
                r.queue_id = None;
            })
    }

    /// Records the hub's confirmation of an export.
    ///
    /// Only exported records are confirmed; a record queued again after the
    /// export keeps waiting for its own export. Returns true if confirmed.
    pub fn confirm(&self, uuid: &Uuid) -> SyncResult<bool> {
        let Some(record) = self.inner.get(uuid)? else {
            debug!(uuid = %uuid, "Confirmation for untracked entity ignored");
            return Ok(false);
        };
        match record.status {
            TrackingStatus::Exported | TrackingStatus::Confirmed => {
                self.inner.transition(
                    &record.entity_type,
                    record.entity_id,
                    *uuid,
                    TrackingStatus::Confirmed,
                    |_| {},
                )?;
                Ok(true)
            }
            other => {
                debug!(uuid = %uuid, status = %other, "Confirmation ignored");
                Ok(false)
            }
        }
    }

    /// Clears the hash of one record.
    pub fn nullify_hash(&self, uuid: &Uuid) -> SyncResult<bool> {
        self.inner.nullify_hash(uuid)
    }

    /// Clears the hash of every matching record.
    pub fn nullify_hashes(&self, filter: &TrackingFilter) -> SyncResult<usize> {
        self.inner.store.nullify_hashes(filter)
    }

    /// Lists records by status, optionally restricted to an entity type.
    pub fn list_by_status(
        &self,
        status: TrackingStatus,
        entity_type: Option<&str>,
    ) -> SyncResult<Vec<TrackingRecord>> {
        self.inner.list_by_status(status, entity_type)
    }

    /// Deletes a record.
    pub fn delete(&self, uuid: &Uuid) -> SyncResult<bool> {
        let deleted = self.inner.store.delete(uuid)?;
        if deleted {
            debug!(uuid = %uuid, "Publisher tracking record deleted");
        }
        Ok(deleted)
    }
}

/// Tracks entities this repository imports.
///
/// `QUEUED → IMPORTED`; `AUTO_UPDATE_DISABLED` is sticky until re-enabled.
#[derive(Clone)]
pub struct SubscriberTracker {
    inner: Tracker,
}

impl SubscriberTracker {
    /// Creates a subscriber tracker over a store.
    pub fn new(store: Arc<dyn TrackingStore>) -> Self {
        Self {
            inner: Tracker {
                role: SiteRole::Subscriber,
                store,
            },
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.inner.store
    }

    /// Gets a record.
    pub fn get(&self, uuid: &Uuid) -> SyncResult<Option<TrackingRecord>> {
        self.inner.get(uuid)
    }

    /// Returns the last imported hash.
    pub fn get_hash(&self, uuid: &Uuid) -> SyncResult<Option<String>> {
        Ok(self.inner.get(uuid)?.and_then(|r| r.hash))
    }

    /// Marks an entity as queued for import.
    ///
    /// Records with auto-update disabled are left untouched.
    pub fn track_queued(
        &self,
        entity_type: &str,
        uuid: Uuid,
        queue_id: &str,
    ) -> SyncResult<TrackingRecord> {
        if let Some(existing) = self.inner.get(&uuid)? {
            if existing.status == TrackingStatus::AutoUpdateDisabled {
                return Ok(existing);
            }
        }
        self.inner
            .transition(entity_type, None, uuid, TrackingStatus::Queued, |r| {
                r.queue_id = Some(queue_id.to_string());
            })
    }

    /// Marks an entity as imported with the hash that was received.
    ///
    /// Records with auto-update disabled keep that status.
    pub fn track_imported(
        &self,
        entity_type: &str,
        entity_id: Option<u64>,
        uuid: Uuid,
        hash: Option<&str>,
    ) -> SyncResult<TrackingRecord> {
        let status = match self.inner.get(&uuid)? {
            Some(existing) if existing.status == TrackingStatus::AutoUpdateDisabled => {
                TrackingStatus::AutoUpdateDisabled
            }
            _ => TrackingStatus::Imported,
        };
        let hash = hash.map(str::to_string);
        self.inner
            .transition(entity_type, entity_id, uuid, status, |r| {
                r.hash = hash;
                r.queue_id = None;
            })
    }

    /// Enables or disables automatic updates for an imported entity.
    ///
    /// Returns false if the entity is not tracked.
    pub fn set_auto_update(&self, uuid: &Uuid, enabled: bool) -> SyncResult<bool> {
        let Some(record) = self.inner.get(uuid)? else {
            warn!(uuid = %uuid, "Cannot toggle auto-update of untracked entity");
            return Ok(false);
        };
        let status = if enabled {
            TrackingStatus::Imported
        } else {
            TrackingStatus::AutoUpdateDisabled
        };
        self.inner
            .transition(&record.entity_type, record.entity_id, *uuid, status, |_| {})?;
        Ok(true)
    }

    /// Returns true if automatic updates are disabled for the entity.
    pub fn is_auto_update_disabled(&self, uuid: &Uuid) -> SyncResult<bool> {
        Ok(self
            .inner
            .get(uuid)?
            .is_some_and(|r| r.status == TrackingStatus::AutoUpdateDisabled))
    }

    /// Clears the hash of one record.
    pub fn nullify_hash(&self, uuid: &Uuid) -> SyncResult<bool> {
        self.inner.nullify_hash(uuid)
    }

    /// Clears the hash of every matching record.
    pub fn nullify_hashes(&self, filter: &TrackingFilter) -> SyncResult<usize> {
        self.inner.store.nullify_hashes(filter)
    }

    /// Lists records by status, optionally restricted to an entity type.
    pub fn list_by_status(
        &self,
        status: TrackingStatus,
        entity_type: Option<&str>,
    ) -> SyncResult<Vec<TrackingRecord>> {
        self.inner.list_by_status(status, entity_type)
    }

    /// Deletes a record.
    pub fn delete(&self, uuid: &Uuid) -> SyncResult<bool> {
        self.inner.store.delete(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn publisher() -> PublisherTracker {
        PublisherTracker::new(Arc::new(MemoryTrackingStore::new()))
    }

    fn subscriber() -> SubscriberTracker {
        SubscriberTracker::new(Arc::new(MemoryTrackingStore::new()))
    }

    #[test]
    fn publisher_lifecycle() {
        let tracker = publisher();
        let queued = tracker.track_queued("node", Some(5), uuid(1)).unwrap();
        assert_eq!(queued.status, TrackingStatus::Queued);
        assert!(queued.hash.is_none());

        tracker.set_queue_id(&uuid(1), "q-1").unwrap();
        assert_eq!(tracker.get(&uuid(1)).unwrap().unwrap().queue_id.as_deref(), Some("q-1"));

        let exported = tracker.track_exported("node", None, uuid(1), "abc").unwrap();
        assert_eq!(exported.status, TrackingStatus::Exported);
        assert_eq!(exported.entity_id, Some(5));
        assert!(exported.queue_id.is_none());

        assert!(tracker.confirm(&uuid(1)).unwrap());
        assert_eq!(tracker.get(&uuid(1)).unwrap().unwrap().status, TrackingStatus::Confirmed);

        // Re-queue keeps the last hash.
        let requeued = tracker.track_queued("node", Some(5), uuid(1)).unwrap();
        assert_eq!(requeued.hash.as_deref(), Some("abc"));
        assert_eq!(requeued.created, exported.created);
    }

    #[test]
    fn confirm_ignores_queued_and_untracked() {
        let tracker = publisher();
        assert!(!tracker.confirm(&uuid(1)).unwrap());
        tracker.track_queued("node", None, uuid(1)).unwrap();
        assert!(!tracker.confirm(&uuid(1)).unwrap());
        assert_eq!(tracker.get(&uuid(1)).unwrap().unwrap().status, TrackingStatus::Queued);
    }

    #[test]
    fn nullify_keeps_status() {
        let tracker = publisher();
        tracker.track_exported("node", None, uuid(1), "h1").unwrap();
        tracker.track_exported("taxonomy_term", None, uuid(2), "h2").unwrap();
        tracker.track_queued("node", None, uuid(3)).unwrap();

        assert!(tracker.nullify_hash(&uuid(1)).unwrap());
        assert_eq!(tracker.get(&uuid(1)).unwrap().unwrap().status, TrackingStatus::Exported);
        assert_eq!(tracker.get_hash(&uuid(1)).unwrap(), None);

        let filter = TrackingFilter::status(TrackingStatus::Exported).with_entity_type("taxonomy_term");
        assert_eq!(tracker.nullify_hashes(&filter).unwrap(), 1);
        assert_eq!(tracker.get_hash(&uuid(2)).unwrap(), None);
        assert!(!tracker.nullify_hash(&uuid(9)).unwrap());
    }

    #[test]
    fn list_by_status_with_type() {
        let tracker = publisher();
        tracker.track_exported("node", None, uuid(1), "h").unwrap();
        tracker.track_exported("user", None, uuid(2), "h").unwrap();
        tracker.track_queued("node", None, uuid(3)).unwrap();

        assert_eq!(tracker.list_by_status(TrackingStatus::Exported, None).unwrap().len(), 2);
        let nodes = tracker
            .list_by_status(TrackingStatus::Exported, Some("node"))
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].entity_uuid, uuid(1));
    }

    #[test]
    fn role_mismatch_is_rejected() {
        let store: Arc<dyn TrackingStore> = Arc::new(MemoryTrackingStore::new());
        SubscriberTracker::new(Arc::clone(&store))
            .track_imported("node", None, uuid(1), Some("h"))
            .unwrap();
        let err = PublisherTracker::new(store)
            .track_exported("node", None, uuid(1), "h")
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
    }

    #[test]
    fn auto_update_is_sticky() {
        let tracker = subscriber();
        assert!(!tracker.set_auto_update(&uuid(1), false).unwrap());

        tracker.track_imported("node", Some(1), uuid(1), Some("h1")).unwrap();
        assert!(tracker.set_auto_update(&uuid(1), false).unwrap());
        assert!(tracker.is_auto_update_disabled(&uuid(1)).unwrap());

        let queued = tracker.track_queued("node", uuid(1), "q").unwrap();
        assert_eq!(queued.status, TrackingStatus::AutoUpdateDisabled);
        let imported = tracker.track_imported("node", None, uuid(1), Some("h2")).unwrap();
        assert_eq!(imported.status, TrackingStatus::AutoUpdateDisabled);

        tracker.set_auto_update(&uuid(1), true).unwrap();
        assert_eq!(tracker.get(&uuid(1)).unwrap().unwrap().status, TrackingStatus::Imported);
    }

    #[test]
    fn default_nullify_through_trait() {
        struct Wrapped(MemoryTrackingStore);
        impl TrackingStore for Wrapped {
            fn get(&self, uuid: &Uuid) -> SyncResult<Option<TrackingRecord>> {
                self.0.get(uuid)
            }
            fn upsert(&self, record: TrackingRecord) -> SyncResult<()> {
                self.0.upsert(record)
            }
            fn delete(&self, uuid: &Uuid) -> SyncResult<bool> {
                self.0.delete(uuid)
            }
            fn list(&self, filter: &TrackingFilter) -> SyncResult<Vec<TrackingRecord>> {
                self.0.list(filter)
            }
        }

        let store = Wrapped(MemoryTrackingStore::new());
        let mut record = TrackingRecord::new("node", uuid(1), TrackingStatus::Exported);
        record.hash = Some("h".into());
        store.upsert(record).unwrap();
        store
            .upsert(TrackingRecord::new("node", uuid(2), TrackingStatus::Exported))
            .unwrap();

        assert_eq!(store.nullify_hashes(&TrackingFilter::all()).unwrap(), 1);
        assert!(store.get(&uuid(1)).unwrap().unwrap().hash.is_none());
    }
}
