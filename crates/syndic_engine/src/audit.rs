//! Audits comparing tracking tables with what the hub holds.

use crate::closure::DependencyResolverClient;
use crate::enqueue::{EnqueueOperation, EntityEnqueuer};
use crate::entity::LocalEntity;
use crate::error::SyncResult;
use crate::host::EntityHost;
use crate::queue::WorkQueue;
use crate::tracker::{SubscriberTracker, TrackingFilter, TrackingRecord, TrackingStore};
use std::sync::Arc;
use syndic_cdf::{ImportQueueItem, TrackingStatus};
use tracing::{info, warn};
use uuid::Uuid;

/// How a tracked entity differs from the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditFinding {
    /// The hub does not have the entity.
    NotPublished,
    /// The hub's hash differs from the tracked hash.
    Outdated,
}

/// Counters from an audit run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Records compared.
    pub checked: usize,
    /// Records absent from the hub.
    pub not_published: usize,
    /// Records whose hash differs from the hub's.
    pub outdated: usize,
    /// Entities enqueued again.
    pub requeued: usize,
    /// Entities that could not be loaded; their rows were deleted.
    pub failed: usize,
    /// Records not compared or not reprocessed.
    pub skipped: usize,
}

impl AuditReport {
    /// Records that need attention.
    pub fn flagged(&self) -> usize {
        self.not_published + self.outdated
    }

    /// A one-line summary for operators.
    pub fn summary(&self) -> String {
        format!(
            "checked {}, not published {}, outdated {}, requeued {}, failed {}, skipped {}",
            self.checked, self.not_published, self.outdated, self.requeued, self.failed, self.skipped
        )
    }
}

/// Compares tracked hashes with the hub in batches.
pub struct Auditor {
    resolver: Arc<dyn DependencyResolverClient>,
    host: Arc<dyn EntityHost>,
    batch_size: usize,
}

impl Auditor {
    /// Creates an auditor.
    pub fn new(resolver: Arc<dyn DependencyResolverClient>, host: Arc<dyn EntityHost>) -> Self {
        Self {
            resolver,
            host,
            batch_size: 50,
        }
    }

    /// Sets the number of records compared per hub request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Audits published entities.
    ///
    /// With `reprocess`, flagged entities have their hash nullified and are
    /// enqueued for export again.
    pub fn audit_publisher(
        &self,
        enqueuer: &EntityEnqueuer,
        filter: &TrackingFilter,
        reprocess: bool,
    ) -> SyncResult<AuditReport> {
        let tracker = enqueuer.tracker();
        let records = tracker.store().list(filter)?;
        let mut report = AuditReport::default();

        for batch in records.chunks(self.batch_size) {
            let Some(flagged) = self.compare(batch, &mut report) else {
                continue;
            };
            if !reprocess {
                continue;
            }
            for (record, _) in flagged {
                let Some(entity) = self.load(record, tracker.store().as_ref(), &mut report)? else {
                    continue;
                };
                tracker.nullify_hash(&record.entity_uuid)?;
                if enqueuer.enqueue(&entity, EnqueueOperation::Update)?.is_queued() {
                    report.requeued += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }

        info!(role = "publisher", summary = %report.summary(), "Audit complete");
        Ok(report)
    }

    /// Audits imported entities.
    ///
    /// With `reprocess`, outdated entities are pushed onto the import queue.
    /// Entities with auto-update disabled and entities the hub no longer has
    /// are left alone.
    pub fn audit_subscriber(
        &self,
        tracker: &SubscriberTracker,
        queue: &dyn WorkQueue<ImportQueueItem>,
        filter: &TrackingFilter,
        reprocess: bool,
    ) -> SyncResult<AuditReport> {
        let records = tracker.store().list(filter)?;
        let mut report = AuditReport::default();

        for batch in records.chunks(self.batch_size) {
            let Some(flagged) = self.compare(batch, &mut report) else {
                continue;
            };
            if !reprocess {
                continue;
            }
            let mut outdated: Vec<&TrackingRecord> = Vec::new();
            for (record, finding) in flagged {
                if finding == AuditFinding::NotPublished
                    || record.status == TrackingStatus::AutoUpdateDisabled
                {
                    report.skipped += 1;
                    continue;
                }
                if self.load(record, tracker.store().as_ref(), &mut report)?.is_some() {
                    outdated.push(record);
                }
            }
            if outdated.is_empty() {
                continue;
            }

            let uuids: Vec<Uuid> = outdated.iter().map(|r| r.entity_uuid).collect();
            let queue_id = queue.push(ImportQueueItem::from_uuids(&uuids))?;
            for record in outdated {
                tracker.track_queued(&record.entity_type, record.entity_uuid, &queue_id)?;
            }
            report.requeued += uuids.len();
        }

        info!(role = "subscriber", summary = %report.summary(), "Audit complete");
        Ok(report)
    }

    /// Fetches one batch and returns the flagged records, or `None` if the
    /// hub could not be reached.
    fn compare<'a>(
        &self,
        batch: &'a [TrackingRecord],
        report: &mut AuditReport,
    ) -> Option<Vec<(&'a TrackingRecord, AuditFinding)>> {
        let uuids: Vec<Uuid> = batch.iter().map(|r| r.entity_uuid).collect();
        let remote = match self.resolver.fetch_entities(&uuids) {
            Ok(remote) => remote,
            Err(e) => {
                warn!(count = batch.len(), error = %e, "Audit batch fetch failed");
                report.skipped += batch.len();
                return None;
            }
        };

        report.checked += batch.len();
        let mut flagged = Vec::new();
        for record in batch {
            let finding = match remote.get(&record.entity_uuid) {
                None => AuditFinding::NotPublished,
                Some(object) if object.hash() != record.hash.as_deref() => AuditFinding::Outdated,
                Some(_) => continue,
            };
            match finding {
                AuditFinding::NotPublished => report.not_published += 1,
                AuditFinding::Outdated => report.outdated += 1,
            }
            flagged.push((record, finding));
        }
        Some(flagged)
    }

    fn load(
        &self,
        record: &TrackingRecord,
        store: &dyn TrackingStore,
        report: &mut AuditReport,
    ) -> SyncResult<Option<LocalEntity>> {
        match self.host.load(&record.entity_type, &record.entity_uuid) {
            Ok(Some(entity)) => Ok(Some(entity)),
            Ok(None) => {
                warn!(uuid = %record.entity_uuid, entity_type = %record.entity_type, "Tracked entity no longer exists, tracking row deleted");
                store.delete(&record.entity_uuid)?;
                report.failed += 1;
                Ok(None)
            }
            Err(e) => {
                warn!(uuid = %record.entity_uuid, error = %e, "Failed to load tracked entity");
                report.failed += 1;
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for Auditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auditor")
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
