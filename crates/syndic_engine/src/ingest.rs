//! Dependency-ordered ingestion of CDF documents.
//!
//! ## Algorithm
//!
//! 1. Run the document through the preprocessing chain.
//! 2. Ensure every capability required by unprocessed objects, before any
//!    entity is touched.
//! 3. Repeatedly materialize the objects whose dependencies are all on the
//!    stack until every object is on the stack.
//! 4. When a pass makes no progress, ask the failure chain for a recovery.
//!    Without one, delete the unfilled stubs of this run and fail.

use crate::context::ImportContext;
use crate::error::{SyncError, SyncResult};
use crate::handlers::{HandlerChain, HandlerContext, SyncHandler};
use crate::host::{CapabilityRegistry, EntityHost, Resolution};
use crate::stack::{DependencyStack, StackEntry};
use crate::stub::StubLedger;
use crate::tracker::SubscriberTracker;
use std::collections::HashSet;
use std::sync::Arc;
use syndic_cdf::{attributes, CdfDocument, CdfObject, TrackingStatus, LANGUAGE_NONE};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Context for preprocessing handlers.
#[derive(Debug)]
pub struct PruneContext {
    document: CdfDocument,
    removed: Vec<Uuid>,
    stopped: bool,
}

impl PruneContext {
    /// Wraps a document.
    pub fn new(document: CdfDocument) -> Self {
        Self {
            document,
            removed: Vec::new(),
            stopped: false,
        }
    }

    /// The document being preprocessed.
    pub fn document(&self) -> &CdfDocument {
        &self.document
    }

    /// Mutable access to the document.
    pub fn document_mut(&mut self) -> &mut CdfDocument {
        &mut self.document
    }

    /// Removes an object from the document.
    pub fn remove(&mut self, uuid: &Uuid) -> Option<CdfObject> {
        let removed = self.document.remove(uuid)?;
        self.removed.push(*uuid);
        Some(removed)
    }

    /// UUIDs removed so far.
    pub fn removed(&self) -> &[Uuid] {
        &self.removed
    }

    /// Stops the remaining handlers.
    pub fn stop_propagation(&mut self) {
        self.stopped = true;
    }

    fn into_parts(self) -> (CdfDocument, Vec<Uuid>) {
        (self.document, self.removed)
    }
}

impl HandlerContext for PruneContext {
    fn is_propagation_stopped(&self) -> bool {
        self.stopped
    }
}

/// What to do after a pass made no progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Drop these objects from the document and continue.
    Drop(Vec<Uuid>),
}

/// Context for failure handlers.
#[derive(Debug)]
pub struct FailureContext {
    /// Objects that could not be materialized.
    pub unresolved: Vec<CdfObject>,
    /// UUIDs materialized so far in this run.
    pub materialized: Vec<Uuid>,
    /// Loop iterations performed.
    pub iterations: usize,
    recovery: Option<RecoveryAction>,
}

impl FailureContext {
    /// Supplies a recovery action and stops the chain.
    pub fn recover(&mut self, action: RecoveryAction) {
        self.recovery = Some(action);
    }

    /// The recovery supplied so far.
    pub fn recovery(&self) -> Option<&RecoveryAction> {
        self.recovery.as_ref()
    }

    /// UUIDs of the unresolved objects.
    pub fn unresolved_uuids(&self) -> Vec<Uuid> {
        self.unresolved.iter().map(|o| o.uuid).collect()
    }
}

impl HandlerContext for FailureContext {
    fn is_propagation_stopped(&self) -> bool {
        self.recovery.is_some()
    }
}

/// Strips attribute values in languages the repository does not accept.
///
/// Language-neutral values are always kept; attributes left without values
/// are removed.
#[derive(Debug, Clone)]
pub struct LanguagePruner {
    languages: HashSet<String>,
}

impl LanguagePruner {
    /// Accepts the given languages.
    pub fn new<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut languages: HashSet<String> = languages.into_iter().map(Into::into).collect();
        languages.insert(LANGUAGE_NONE.to_string());
        Self { languages }
    }
}

impl SyncHandler<PruneContext> for LanguagePruner {
    fn handle(&self, context: &mut PruneContext) -> SyncResult<()> {
        for object in context.document_mut().entities_mut() {
            let mut stripped = 0;
            object.attributes.retain(|name, attribute| {
                if name == attributes::HASH {
                    return true;
                }
                stripped += attribute.retain_languages(|lang| self.languages.contains(lang));
                !attribute.is_empty()
            });
            if stripped > 0 {
                debug!(uuid = %object.uuid, stripped, "Pruned unsupported languages");
            }
        }
        Ok(())
    }
}

/// Failure handler that drops every unresolved object.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropUnresolved;

impl SyncHandler<FailureContext> for DropUnresolved {
    fn handle(&self, context: &mut FailureContext) -> SyncResult<()> {
        let uuids = context.unresolved_uuids();
        warn!(count = uuids.len(), "Dropping unresolved objects");
        context.recover(RecoveryAction::Drop(uuids));
        Ok(())
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Objects written, in materialization order.
    pub materialized: Vec<Uuid>,
    /// Objects left as they were (unchanged or auto-update disabled).
    pub unchanged: Vec<Uuid>,
    /// Objects the host declined.
    pub declined: Vec<Uuid>,
    /// Objects removed by preprocessing or recovery.
    pub dropped: Vec<Uuid>,
    /// Loop iterations performed.
    pub iterations: usize,
}

enum Materialized {
    Saved,
    Unchanged,
    Declined,
}

/// Ingests CDF documents into the host in dependency order.
pub struct IngestionEngine {
    host: Arc<dyn EntityHost>,
    capabilities: Arc<dyn CapabilityRegistry>,
    tracker: Option<SubscriberTracker>,
    preprocessors: HandlerChain<PruneContext>,
    failure_handlers: HandlerChain<FailureContext>,
    max_iterations: Option<usize>,
}

impl IngestionEngine {
    /// Creates an engine with empty handler chains.
    pub fn new(host: Arc<dyn EntityHost>, capabilities: Arc<dyn CapabilityRegistry>) -> Self {
        Self {
            host,
            capabilities,
            tracker: None,
            preprocessors: HandlerChain::new(),
            failure_handlers: HandlerChain::new(),
            max_iterations: None,
        }
    }

    /// Records every write in the subscriber tracker and skips unchanged objects.
    pub fn with_tracker(mut self, tracker: SubscriberTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Sets a fixed iteration cap.
    pub fn with_max_iterations(mut self, max: Option<usize>) -> Self {
        self.max_iterations = max;
        self
    }

    /// Adds a preprocessing handler.
    pub fn with_preprocessor(mut self, handler: impl SyncHandler<PruneContext> + 'static) -> Self {
        self.preprocessors.register(handler);
        self
    }

    /// Adds a failure handler.
    pub fn with_failure_handler(
        mut self,
        handler: impl SyncHandler<FailureContext> + 'static,
    ) -> Self {
        self.failure_handlers.register(handler);
        self
    }

    /// The preprocessing chain.
    pub fn preprocessors_mut(&mut self) -> &mut HandlerChain<PruneContext> {
        &mut self.preprocessors
    }

    /// The failure chain.
    pub fn failure_handlers_mut(&mut self) -> &mut HandlerChain<FailureContext> {
        &mut self.failure_handlers
    }

    /// Ingests a document.
    ///
    /// Objects already on `stack` are treated as processed. Entities written
    /// before a failure stay committed.
    pub fn ingest(&self, document: CdfDocument, stack: &mut DependencyStack) -> SyncResult<IngestReport> {
        if !document.has_entities() {
            return Err(SyncError::InvalidDocument);
        }

        let mut report = IngestReport::default();
        let mut context = PruneContext::new(document);
        self.preprocessors.dispatch(&mut context)?;
        let (mut document, removed) = context.into_parts();
        report.dropped.extend(removed);

        self.ensure_capabilities(&document, stack)?;

        let limit = self.max_iterations.unwrap_or(document.len() + 1);
        let mut stubs = StubLedger::new();

        loop {
            let pending: Vec<Uuid> = document
                .entities()
                .filter(|o| !stack.has_dependency(&o.uuid))
                .map(|o| o.uuid)
                .collect();
            if pending.is_empty() {
                break;
            }

            let mut progressed = false;
            if report.iterations < limit {
                report.iterations += 1;
                let ready: Vec<Uuid> = pending
                    .iter()
                    .filter(|uuid| {
                        document
                            .get(uuid)
                            .is_some_and(|o| stack.has_dependencies(o.dependencies.keys()))
                    })
                    .copied()
                    .collect();

                for uuid in ready {
                    let Some(object) = document.get(&uuid).cloned() else {
                        continue;
                    };
                    let outcome = match self.materialize(&object, stack, &mut stubs) {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(uuid = %uuid, error = %e, "Materialization failed");
                            stubs.cleanup(self.host.as_ref(), true);
                            return Err(e);
                        }
                    };
                    progressed = true;
                    match outcome {
                        Materialized::Saved => report.materialized.push(uuid),
                        Materialized::Unchanged => report.unchanged.push(uuid),
                        Materialized::Declined => {
                            document.remove(&uuid);
                            report.declined.push(uuid);
                        }
                    }
                }
            }

            if !progressed {
                let unresolved: Vec<CdfObject> = pending
                    .iter()
                    .filter_map(|uuid| document.get(uuid).cloned())
                    .collect();
                let recovered = self.recover(unresolved, &report)?;
                let dropped: Vec<Uuid> = recovered
                    .into_iter()
                    .filter(|uuid| document.remove(uuid).is_some())
                    .collect();
                if dropped.is_empty() || report.iterations >= limit {
                    let unresolved: Vec<Uuid> = document
                        .entities()
                        .filter(|o| !stack.has_dependency(&o.uuid))
                        .map(|o| o.uuid)
                        .collect();
                    let deleted = stubs.cleanup(self.host.as_ref(), true);
                    error!(
                        unresolved = unresolved.len(),
                        iterations = report.iterations,
                        stubs_deleted = deleted,
                        "Ingestion made no progress"
                    );
                    return Err(SyncError::NoProgress {
                        unresolved,
                        iterations: report.iterations,
                    });
                }
                report.dropped.extend(dropped);
            }
        }

        stubs.cleanup(self.host.as_ref(), false);
        info!(
            materialized = report.materialized.len(),
            unchanged = report.unchanged.len(),
            declined = report.declined.len(),
            iterations = report.iterations,
            "Ingestion complete"
        );
        Ok(report)
    }

    fn ensure_capabilities(&self, document: &CdfDocument, stack: &DependencyStack) -> SyncResult<()> {
        let mut required: Vec<&str> = Vec::new();
        for object in document.entities().filter(|o| !stack.has_dependency(&o.uuid)) {
            for module in &object.module_dependencies {
                if !required.contains(&module.as_str()) {
                    required.push(module);
                }
            }
        }
        for capability in required {
            if let Err(e) = self.capabilities.ensure(capability) {
                error!(capability, "Required capability unavailable");
                return Err(e);
            }
        }
        Ok(())
    }

    fn recover(&self, unresolved: Vec<CdfObject>, report: &IngestReport) -> SyncResult<Vec<Uuid>> {
        let mut context = FailureContext {
            unresolved,
            materialized: report.materialized.clone(),
            iterations: report.iterations,
            recovery: None,
        };
        self.failure_handlers.dispatch(&mut context)?;
        Ok(match context.recovery {
            Some(RecoveryAction::Drop(uuids)) => uuids,
            None => Vec::new(),
        })
    }

    fn materialize(
        &self,
        object: &CdfObject,
        stack: &mut DependencyStack,
        stubs: &mut StubLedger,
    ) -> SyncResult<Materialized> {
        if let Some(entry) = self.unchanged_entry(object)? {
            debug!(uuid = %object.uuid, "Object unchanged, not rewritten");
            stack.add_dependency(entry);
            return Ok(Materialized::Unchanged);
        }

        let mut entity = match self.host.resolve(object, stack)? {
            Resolution::Existing(entity) | Resolution::Created(entity) => entity,
            Resolution::Declined { reason } => {
                debug!(uuid = %object.uuid, reason = %reason, "Host declined object");
                return Ok(Materialized::Declined);
            }
        };

        self.host.populate(&mut entity, object, stack, stubs)?;
        entity.fill();
        self.host
            .save(&mut entity, &ImportContext::syndication(object.origin))?;
        stubs.mark_filled(&object.uuid);
        stubs.mark_filled(&entity.uuid);

        if let Some(tracker) = &self.tracker {
            tracker.track_imported(&entity.entity_type, entity.id, object.uuid, object.hash())?;
        }
        stack.add_dependency(StackEntry::from_entity(object.uuid, &entity));
        Ok(Materialized::Saved)
    }

    fn unchanged_entry(&self, object: &CdfObject) -> SyncResult<Option<StackEntry>> {
        let Some(tracker) = &self.tracker else {
            return Ok(None);
        };
        let Some(record) = tracker.get(&object.uuid)? else {
            return Ok(None);
        };
        let keep = match record.status {
            TrackingStatus::AutoUpdateDisabled => true,
            TrackingStatus::Imported => {
                record.hash.is_some() && record.hash.as_deref() == object.hash()
            }
            _ => false,
        };
        if !keep {
            return Ok(None);
        }
        match self.host.load(&record.entity_type, &object.uuid)? {
            Some(entity) => Ok(Some(StackEntry::from_entity(object.uuid, &entity))),
            None => {
                warn!(uuid = %object.uuid, "Tracked entity missing locally, importing again");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for IngestionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionEngine")
            .field("tracker", &self.tracker.is_some())
            .field("preprocessors", &self.preprocessors)
            .field("failure_handlers", &self.failure_handlers)
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}
