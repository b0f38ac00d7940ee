//! Export worker: serializes queued entities and publishes them to the hub.

use crate::entity::LocalEntity;
use crate::error::{SyncError, SyncResult};
use crate::handlers::{HandlerChain, HandlerContext, SyncHandler};
use crate::host::{DependencyCalculator, DependencyWrapper, EntityHost};
use crate::interest::InterestManager;
use crate::queue::{QueueItem, QueueWorker, WorkOutcome};
use crate::serializer::{link_dependency_hashes, Serializer};
use crate::tracker::PublisherTracker;
use std::collections::HashMap;
use std::sync::Arc;
use syndic_cdf::{
    CdfDocument, CdfObject, ExportQueueItem, InterestReason, SiteRole, TrackingStatus,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receives published documents.
pub trait ExportTarget: Send + Sync {
    /// Publishes every object of the document.
    fn publish(&self, document: &CdfDocument) -> SyncResult<()>;
}

/// Context for publish pruning handlers.
#[derive(Debug)]
pub struct PublishContext {
    /// The document about to be published.
    pub document: CdfDocument,
    /// The entity the export was queued for.
    pub root: Uuid,
    /// Set when the root's hash was nullified; nothing may be pruned.
    pub force: bool,
    removed: Vec<Uuid>,
    stopped: bool,
}

impl PublishContext {
    /// Creates a context.
    pub fn new(document: CdfDocument, root: Uuid, force: bool) -> Self {
        Self {
            document,
            root,
            force,
            removed: Vec::new(),
            stopped: false,
        }
    }

    /// Removes an object from the outgoing document.
    pub fn remove(&mut self, uuid: &Uuid) -> Option<CdfObject> {
        let removed = self.document.remove(uuid);
        if removed.is_some() {
            self.removed.push(*uuid);
        }
        removed
    }

    /// UUIDs removed so far.
    pub fn removed(&self) -> &[Uuid] {
        &self.removed
    }

    /// Stops the remaining handlers.
    pub fn stop_propagation(&mut self) {
        self.stopped = true;
    }
}

impl HandlerContext for PublishContext {
    fn is_propagation_stopped(&self) -> bool {
        self.stopped
    }
}

/// Removes objects whose hash equals the last exported hash.
pub struct UnmodifiedPruner {
    tracker: PublisherTracker,
}

impl UnmodifiedPruner {
    /// Creates the pruner.
    pub fn new(tracker: PublisherTracker) -> Self {
        Self { tracker }
    }
}

impl SyncHandler<PublishContext> for UnmodifiedPruner {
    fn handle(&self, context: &mut PublishContext) -> SyncResult<()> {
        if context.force {
            return Ok(());
        }
        let mut unmodified = Vec::new();
        for object in context.document.entities() {
            let Some(tracked) = self.tracker.get_hash(&object.uuid)? else {
                continue;
            };
            if object.hash() == Some(tracked.as_str()) {
                unmodified.push(object.uuid);
            }
        }
        for uuid in unmodified {
            context.remove(&uuid);
        }
        Ok(())
    }
}

/// Outcome of one export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Objects sent to the hub.
    pub published: Vec<Uuid>,
    /// Objects left out because they were unmodified.
    pub pruned: Vec<Uuid>,
}

impl ExportReport {
    /// Returns true if nothing was sent.
    pub fn is_skipped(&self) -> bool {
        self.published.is_empty()
    }
}

/// Processes export work items.
pub struct ExportWorker {
    host: Arc<dyn EntityHost>,
    calculator: Arc<dyn DependencyCalculator>,
    serializer: Serializer,
    tracker: PublisherTracker,
    target: Arc<dyn ExportTarget>,
    interests: Option<InterestManager>,
    pruners: HandlerChain<PublishContext>,
}

impl ExportWorker {
    /// Creates a worker with the unmodified-entity pruner installed.
    pub fn new(
        host: Arc<dyn EntityHost>,
        calculator: Arc<dyn DependencyCalculator>,
        serializer: Serializer,
        tracker: PublisherTracker,
        target: Arc<dyn ExportTarget>,
    ) -> Self {
        let mut pruners = HandlerChain::new();
        pruners.register_with_priority(100, UnmodifiedPruner::new(tracker.clone()));
        Self {
            host,
            calculator,
            serializer,
            tracker,
            target,
            interests: None,
            pruners,
        }
    }

    /// Adds exported entities to the publisher interest list.
    pub fn with_interest_manager(mut self, interests: InterestManager) -> Self {
        self.interests = Some(interests);
        self
    }

    /// Adds a publish pruning handler.
    pub fn with_pruner(mut self, handler: impl SyncHandler<PublishContext> + 'static) -> Self {
        self.pruners.register(handler);
        self
    }

    /// Exports one queued entity with its dependencies.
    ///
    /// A tracked entity that no longer exists has its record deleted and
    /// fails with [`SyncError::EntityNotFound`].
    pub fn export(&self, item: &ExportQueueItem) -> SyncResult<ExportReport> {
        let Some(root) = self.host.load(&item.entity_type, &item.uuid)? else {
            warn!(uuid = %item.uuid, entity_type = %item.entity_type, "Queued entity no longer exists, tracking row deleted");
            self.tracker.delete(&item.uuid)?;
            return Err(SyncError::EntityNotFound {
                entity_type: item.entity_type.clone(),
                uuid: item.uuid,
            });
        };

        let mut wrapper = if item.should_calculate_dependencies() {
            self.calculator.calculate(&root)?
        } else {
            DependencyWrapper::empty(&root)
        };

        let mut entities: HashMap<Uuid, LocalEntity> = HashMap::new();
        let mut document = CdfDocument::new();
        let mut stubs = Vec::new();
        for dependency in &wrapper.dependencies {
            let Some(entity) = self.host.load(&dependency.entity_type, &dependency.uuid)? else {
                warn!(uuid = %dependency.uuid, root = %root.uuid, "Dependency could not be loaded");
                continue;
            };
            if entity.is_stub() {
                debug!(uuid = %entity.uuid, root = %root.uuid, "Stub left out of export");
                stubs.push(entity.uuid);
                continue;
            }
            let own = if item.should_calculate_dependencies() {
                self.calculator.calculate(&entity)?
            } else {
                DependencyWrapper::empty(&entity)
            };
            document.add(self.serializer.serialize(&entity, &own)?);
            entities.insert(entity.uuid, entity);
        }
        wrapper.dependencies.retain(|d| !stubs.contains(&d.uuid));
        document.add(self.serializer.serialize(&root, &wrapper)?);
        link_dependency_hashes(&mut document);

        let root_hash = document
            .get(&root.uuid)
            .and_then(CdfObject::hash)
            .unwrap_or_default()
            .to_string();
        let force = self
            .tracker
            .get(&root.uuid)?
            .is_some_and(|record| record.hash.is_none());

        let mut context = PublishContext::new(document, root.uuid, force);
        self.pruners.dispatch(&mut context)?;
        let PublishContext {
            document, removed, ..
        } = context;

        let mut report = ExportReport {
            published: document.uuids(),
            pruned: removed,
        };

        if document.has_entities() {
            self.target.publish(&document)?;
            for object in document.entities() {
                let (entity_type, entity_id) = match entities.get(&object.uuid) {
                    Some(entity) => (entity.entity_type.as_str(), entity.id),
                    None => (root.entity_type.as_str(), root.id),
                };
                self.tracker.track_exported(
                    entity_type,
                    entity_id,
                    object.uuid,
                    object.hash().unwrap_or_default(),
                )?;
            }
        } else {
            debug!(uuid = %root.uuid, "Nothing modified, export skipped");
        }
        if !report.published.contains(&root.uuid) {
            let confirmed = self.tracker.get(&root.uuid)?.is_some_and(|record| {
                record.status == TrackingStatus::Confirmed
                    && record.hash.as_deref() == Some(root_hash.as_str())
            });
            if !confirmed {
                self.tracker
                    .track_exported(&root.entity_type, root.id, root.uuid, root_hash)?;
            }
        }

        if let Some(interests) = &self.interests {
            let mut uuids = report.published.clone();
            if !uuids.contains(&root.uuid) {
                uuids.push(root.uuid);
            }
            if let Err(e) = interests.add(
                &uuids,
                SiteRole::Publisher,
                InterestReason::ExportSuccessful,
                TrackingStatus::Exported,
            ) {
                warn!(uuid = %root.uuid, error = %e, "Failed to update publisher interest list");
            }
        }

        report.published.sort();
        info!(
            uuid = %root.uuid,
            published = report.published.len(),
            pruned = report.pruned.len(),
            "Entity exported"
        );
        Ok(report)
    }
}

impl QueueWorker<ExportQueueItem> for ExportWorker {
    fn process(&self, item: &QueueItem<ExportQueueItem>) -> WorkOutcome {
        match self.export(&item.payload) {
            Ok(_) => WorkOutcome::Success,
            Err(e @ SyncError::EntityNotFound { .. }) => WorkOutcome::Drop(e.to_string()),
            Err(e) => WorkOutcome::Retry(e.to_string()),
        }
    }
}

impl std::fmt::Debug for ExportWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportWorker")
            .field("serializer", &self.serializer)
            .field("interests", &self.interests)
            .field("pruners", &self.pruners)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::entity::EntityRef;
    use crate::memory::{MemoryEntityHost, ReferenceCalculator, STUB_ENTITY_TYPE};
    use crate::queue::{process_next, MemoryQueue, WorkQueue};
    use crate::tracker::MemoryTrackingStore;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Outbox {
        documents: Mutex<Vec<CdfDocument>>,
        fail: Mutex<bool>,
    }

    impl ExportTarget for Outbox {
        fn publish(&self, document: &CdfDocument) -> SyncResult<()> {
            if *self.fail.lock() {
                return Err(SyncError::transport_retryable("hub unavailable"));
            }
            self.documents.lock().push(document.clone());
            Ok(())
        }
    }

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    struct Site {
        host: Arc<MemoryEntityHost>,
        tracker: PublisherTracker,
        outbox: Arc<Outbox>,
        worker: ExportWorker,
    }

    fn site() -> Site {
        let host = Arc::new(MemoryEntityHost::new());
        host.insert(LocalEntity::new("user", uuid(3)).with_label("editor"));
        host.insert(
            LocalEntity::new("taxonomy_term", uuid(2))
                .with_label("news")
                .with_reference("uid", vec![uuid(3)]),
        );
        host.insert(
            LocalEntity::new("node", uuid(1))
                .with_label("Hello")
                .with_reference("field_tags", vec![uuid(2)]),
        );
        let tracker = PublisherTracker::new(Arc::new(MemoryTrackingStore::new()));
        let outbox = Arc::new(Outbox::default());
        let worker = ExportWorker::new(
            host.clone(),
            Arc::new(ReferenceCalculator::new(host.clone())),
            Serializer::new(uuid(100)),
            tracker.clone(),
            outbox.clone(),
        );
        Site {
            host,
            tracker,
            outbox,
            worker,
        }
    }

    #[test]
    fn exports_root_with_dependencies() {
        let s = site();
        s.tracker.track_queued("node", Some(1), uuid(1)).unwrap();

        let report = s.worker.export(&ExportQueueItem::new("node", uuid(1))).unwrap();
        assert_eq!(report.published, vec![uuid(1), uuid(2), uuid(3)]);

        let documents = s.outbox.documents.lock();
        let document = &documents[0];
        let node = document.get(&uuid(1)).unwrap();
        let term = document.get(&uuid(2)).unwrap();
        assert_eq!(node.dependency_uuids(), vec![uuid(2), uuid(3)]);
        assert_eq!(node.dependencies[&uuid(2)], term.hash().unwrap());
        assert_eq!(term.dependency_uuids(), vec![uuid(3)]);

        for n in 1..=3 {
            let record = s.tracker.get(&uuid(n)).unwrap().unwrap();
            assert_eq!(record.status, TrackingStatus::Exported);
            assert_eq!(
                record.hash.as_deref(),
                document.get(&uuid(n)).unwrap().hash()
            );
        }
    }

    #[test]
    fn unmodified_export_is_skipped_until_nullified() {
        let s = site();
        let item = ExportQueueItem::new("node", uuid(1));
        s.worker.export(&item).unwrap();

        s.tracker.track_queued("node", Some(1), uuid(1)).unwrap();
        let second = s.worker.export(&item).unwrap();
        assert!(second.is_skipped());
        assert_eq!(second.pruned.len(), 3);
        assert_eq!(s.outbox.documents.lock().len(), 1);
        assert_eq!(
            s.tracker.get(&uuid(1)).unwrap().unwrap().status,
            TrackingStatus::Exported
        );

        s.tracker.nullify_hash(&uuid(1)).unwrap();
        let third = s.worker.export(&item).unwrap();
        assert_eq!(third.published.len(), 3);
        assert!(third.pruned.is_empty());
    }

    #[test]
    fn skipped_export_keeps_confirmation() {
        let s = site();
        let item = ExportQueueItem::new("node", uuid(1));
        s.worker.export(&item).unwrap();
        for n in 1..=3 {
            assert!(s.tracker.confirm(&uuid(n)).unwrap());
        }

        let again = s.worker.export(&item).unwrap();
        assert!(again.is_skipped());
        assert_eq!(
            s.tracker.get(&uuid(1)).unwrap().unwrap().status,
            TrackingStatus::Confirmed
        );
    }

    struct Listed(Vec<EntityRef>);

    impl DependencyCalculator for Listed {
        fn calculate(&self, entity: &LocalEntity) -> SyncResult<DependencyWrapper> {
            let mut wrapper = DependencyWrapper::empty(entity);
            if entity.uuid == uuid(1) {
                wrapper.dependencies = self.0.clone();
            }
            Ok(wrapper)
        }
    }

    #[test]
    fn stubs_are_never_published() {
        let s = site();
        s.host.insert(LocalEntity::stub(STUB_ENTITY_TYPE, uuid(9)));
        let node = s.host.get(&uuid(1)).unwrap().with_reference("field_related", vec![uuid(9)]);
        s.host.insert(node);

        let report = s.worker.export(&ExportQueueItem::new("node", uuid(1))).unwrap();
        assert_eq!(report.published, vec![uuid(1), uuid(2), uuid(3)]);

        let worker = ExportWorker::new(
            s.host.clone(),
            Arc::new(Listed(vec![
                EntityRef::new("taxonomy_term", uuid(2)),
                EntityRef::new(STUB_ENTITY_TYPE, uuid(9)),
            ])),
            Serializer::new(uuid(100)),
            PublisherTracker::new(Arc::new(MemoryTrackingStore::new())),
            s.outbox.clone(),
        );
        let report = worker.export(&ExportQueueItem::new("node", uuid(1))).unwrap();
        assert_eq!(report.published, vec![uuid(1), uuid(2)]);
        for document in s.outbox.documents.lock().iter() {
            assert!(!document.contains(&uuid(9)));
            assert!(!document.get(&uuid(1)).unwrap().depends_on(&uuid(9)));
        }
    }

    #[test]
    fn only_modified_dependencies_are_sent() {
        let s = site();
        let item = ExportQueueItem::new("node", uuid(1));
        s.worker.export(&item).unwrap();

        let mut term = s.host.get(&uuid(2)).unwrap();
        term.label = Some("world".into());
        s.host.insert(term);

        let mut report = s.worker.export(&item).unwrap();
        report.pruned.sort();
        assert_eq!(report.published, vec![uuid(2)]);
        assert_eq!(report.pruned, vec![uuid(1), uuid(3)]);
    }

    #[test]
    fn flat_export_skips_dependency_calculation() {
        let s = site();
        let item = ExportQueueItem::new("node", uuid(1)).with_calculate_dependencies(false);
        let report = s.worker.export(&item).unwrap();
        assert_eq!(report.published, vec![uuid(1)]);
        assert!(s.outbox.documents.lock()[0].get(&uuid(1)).unwrap().dependencies.is_empty());
    }

    #[test]
    fn missing_entity_is_dropped_and_untracked() {
        let s = site();
        s.tracker.track_queued("node", Some(9), uuid(9)).unwrap();
        let queue = MemoryQueue::new();
        queue.push(ExportQueueItem::new("node", uuid(9))).unwrap();

        let outcome = process_next(&queue, &s.worker, &RetryConfig::default()).unwrap();
        assert!(matches!(outcome, Some(WorkOutcome::Drop(_))));
        assert!(s.tracker.get(&uuid(9)).unwrap().is_none());
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn publish_failure_is_retried_and_stays_queued() {
        let s = site();
        s.tracker.track_queued("node", Some(1), uuid(1)).unwrap();
        *s.outbox.fail.lock() = true;
        let queue = MemoryQueue::new();
        queue.push(ExportQueueItem::new("node", uuid(1))).unwrap();

        let outcome = process_next(&queue, &s.worker, &RetryConfig::default()).unwrap();
        assert!(matches!(outcome, Some(WorkOutcome::Retry(_))));
        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(
            s.tracker.get(&uuid(1)).unwrap().unwrap().status,
            TrackingStatus::Queued
        );
        assert!(s
            .tracker
            .list_by_status(TrackingStatus::Exported, None)
            .unwrap()
            .is_empty());
    }
}
