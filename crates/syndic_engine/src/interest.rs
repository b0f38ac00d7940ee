//! Interest list maintenance and reconciliation with the tracking tables.

use crate::error::SyncResult;
use crate::tracker::{TrackingFilter, TrackingStore};
use std::collections::HashSet;
use std::sync::Arc;
use syndic_cdf::{InterestEntry, InterestReason, SiteRole, TrackingStatus};
use tracing::{debug, info};
use uuid::Uuid;

/// Remote interest list operations.
pub trait InterestListClient: Send + Sync {
    /// Adds entries; existing entries are left as they are.
    fn add_entities(&self, webhook: &Uuid, entries: &[InterestEntry]) -> SyncResult<()>;

    /// Removes UUIDs from one role's list.
    fn remove_entities(&self, webhook: &Uuid, role: SiteRole, uuids: &[Uuid]) -> SyncResult<()>;

    /// Lists one role's entries.
    fn list_entities(&self, webhook: &Uuid, role: SiteRole) -> SyncResult<Vec<InterestEntry>>;
}

/// Counters from a reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterestSyncReport {
    /// Tracked rows considered.
    pub tracked: usize,
    /// Rows already on the remote list.
    pub already_listed: usize,
    /// Rows added to the remote list.
    pub added: usize,
    /// Requests sent.
    pub batches: usize,
}

/// Maintains the interest lists of one webhook.
#[derive(Clone)]
pub struct InterestManager {
    webhook: Uuid,
    client: Arc<dyn InterestListClient>,
    batch_size: usize,
}

impl InterestManager {
    /// Creates a manager for a webhook.
    pub fn new(webhook: Uuid, client: Arc<dyn InterestListClient>, batch_size: usize) -> Self {
        Self {
            webhook,
            client,
            batch_size: batch_size.max(1),
        }
    }

    /// The webhook identity.
    pub fn webhook(&self) -> Uuid {
        self.webhook
    }

    /// Adds UUIDs to one role's list.
    pub fn add(
        &self,
        uuids: &[Uuid],
        role: SiteRole,
        reason: InterestReason,
        status: TrackingStatus,
    ) -> SyncResult<()> {
        let entries: Vec<InterestEntry> = uuids
            .iter()
            .map(|uuid| InterestEntry::new(self.webhook, *uuid, role, reason, status))
            .collect();
        for chunk in entries.chunks(self.batch_size) {
            self.client.add_entities(&self.webhook, chunk)?;
        }
        debug!(count = uuids.len(), role = ?role, reason = ?reason, "Interest list updated");
        Ok(())
    }

    /// Removes UUIDs from one role's list.
    pub fn remove(&self, uuids: &[Uuid], role: SiteRole) -> SyncResult<()> {
        for chunk in uuids.chunks(self.batch_size) {
            self.client.remove_entities(&self.webhook, role, chunk)?;
        }
        Ok(())
    }

    /// Pushes every synchronized tracking row missing from the remote list.
    pub fn sync_from_store(&self, store: &dyn TrackingStore, role: SiteRole) -> SyncResult<InterestSyncReport> {
        let records = store.list(&TrackingFilter::statuses(role.synchronized_statuses()))?;
        let listed: HashSet<Uuid> = self
            .client
            .list_entities(&self.webhook, role)?
            .into_iter()
            .map(|entry| entry.uuid)
            .collect();

        let reason = match role {
            SiteRole::Publisher => InterestReason::ExportSuccessful,
            SiteRole::Subscriber => InterestReason::ImportSuccessful,
        };
        let mut report = InterestSyncReport {
            tracked: records.len(),
            ..Default::default()
        };
        let missing: Vec<InterestEntry> = records
            .iter()
            .filter(|record| !listed.contains(&record.entity_uuid))
            .map(|record| InterestEntry::new(self.webhook, record.entity_uuid, role, reason, record.status))
            .collect();
        report.already_listed = report.tracked - missing.len();

        for chunk in missing.chunks(self.batch_size) {
            self.client.add_entities(&self.webhook, chunk)?;
            report.added += chunk.len();
            report.batches += 1;
        }
        info!(
            role = ?role,
            tracked = report.tracked,
            added = report.added,
            batches = report.batches,
            "Interest list reconciled"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for InterestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterestManager")
            .field("webhook", &self.webhook)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{MemoryTrackingStore, TrackingRecord};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Lists {
        entries: Mutex<Vec<InterestEntry>>,
        add_calls: Mutex<usize>,
    }

    impl InterestListClient for Lists {
        fn add_entities(&self, _webhook: &Uuid, entries: &[InterestEntry]) -> SyncResult<()> {
            *self.add_calls.lock() += 1;
            let mut all = self.entries.lock();
            for entry in entries {
                if !all.iter().any(|e| e.uuid == entry.uuid && e.site_role == entry.site_role) {
                    all.push(entry.clone());
                }
            }
            Ok(())
        }

        fn remove_entities(&self, _webhook: &Uuid, role: SiteRole, uuids: &[Uuid]) -> SyncResult<()> {
            self.entries
                .lock()
                .retain(|e| !(e.site_role == role && uuids.contains(&e.uuid)));
            Ok(())
        }

        fn list_entities(&self, _webhook: &Uuid, role: SiteRole) -> SyncResult<Vec<InterestEntry>> {
            Ok(self
                .entries
                .lock()
                .iter()
                .filter(|e| e.site_role == role)
                .cloned()
                .collect())
        }
    }

    fn record(n: u128, status: TrackingStatus) -> TrackingRecord {
        TrackingRecord::new("node", Uuid::from_u128(n), status)
    }

    #[test]
    fn sync_pushes_only_missing_synchronized_rows() {
        let lists = Arc::new(Lists::default());
        let manager = InterestManager::new(Uuid::from_u128(77), lists.clone(), 2);
        manager
            .add(
                &[Uuid::from_u128(1)],
                SiteRole::Publisher,
                InterestReason::Manual,
                TrackingStatus::Exported,
            )
            .unwrap();

        let store = MemoryTrackingStore::new();
        for (n, status) in [
            (1, TrackingStatus::Exported),
            (2, TrackingStatus::Confirmed),
            (3, TrackingStatus::Exported),
            (4, TrackingStatus::Exported),
            (5, TrackingStatus::Queued),
        ] {
            store.upsert(record(n, status)).unwrap();
        }

        let report = manager.sync_from_store(&store, SiteRole::Publisher).unwrap();
        assert_eq!(report.tracked, 4);
        assert_eq!(report.already_listed, 1);
        assert_eq!(report.added, 3);
        assert_eq!(report.batches, 2);

        let listed = lists.list_entities(&Uuid::from_u128(77), SiteRole::Publisher).unwrap();
        assert_eq!(listed.len(), 4);
        assert!(listed
            .iter()
            .filter(|e| e.uuid != Uuid::from_u128(1))
            .all(|e| e.reason == InterestReason::ExportSuccessful));

        let again = manager.sync_from_store(&store, SiteRole::Publisher).unwrap();
        assert_eq!(again.added, 0);
    }

    #[test]
    fn remove_is_scoped_to_role() {
        let lists = Arc::new(Lists::default());
        let manager = InterestManager::new(Uuid::from_u128(77), lists.clone(), 10);
        let uuid = Uuid::from_u128(1);
        manager
            .add(&[uuid], SiteRole::Subscriber, InterestReason::ImportSuccessful, TrackingStatus::Imported)
            .unwrap();
        manager
            .add(&[uuid], SiteRole::Publisher, InterestReason::Manual, TrackingStatus::Exported)
            .unwrap();

        manager.remove(&[uuid], SiteRole::Subscriber).unwrap();
        assert!(lists.list_entities(&Uuid::from_u128(77), SiteRole::Subscriber).unwrap().is_empty());
        assert_eq!(lists.list_entities(&Uuid::from_u128(77), SiteRole::Publisher).unwrap().len(), 1);
    }
}
