//! Export enqueueing with pluggable eligibility rules.

use crate::config::SyncConfig;
use crate::entity::LocalEntity;
use crate::error::SyncResult;
use crate::handlers::{HandlerChain, HandlerContext, SyncHandler};
use crate::queue::WorkQueue;
use crate::tracker::PublisherTracker;
use std::collections::HashSet;
use std::sync::Arc;
use syndic_cdf::{ExportQueueItem, TrackingStatus};
use tracing::debug;
use uuid::Uuid;

/// Why an entity is being enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOperation {
    /// The entity was created.
    Insert,
    /// The entity was updated or is being re-exported.
    Update,
}

/// Context for eligibility rules.
#[derive(Debug)]
pub struct EligibilityContext {
    /// The candidate entity.
    pub entity: LocalEntity,
    /// Triggering operation.
    pub operation: EnqueueOperation,
    /// Whether the export calculates dependencies.
    pub calculate_dependencies: bool,
    reason: Option<String>,
}

impl EligibilityContext {
    /// Creates an eligible context.
    pub fn new(entity: LocalEntity, operation: EnqueueOperation) -> Self {
        Self {
            entity,
            operation,
            calculate_dependencies: true,
            reason: None,
        }
    }

    /// Rejects the entity and stops the chain.
    pub fn reject(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    /// Returns true while no rule has rejected the entity.
    pub fn is_eligible(&self) -> bool {
        self.reason.is_none()
    }

    /// The rejection reason.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl HandlerContext for EligibilityContext {
    fn is_propagation_stopped(&self) -> bool {
        self.reason.is_some()
    }
}

/// Result of an enqueue request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A work item was pushed.
    Queued {
        /// Id of the work item.
        queue_id: String,
    },
    /// The entity was not enqueued.
    Ineligible {
        /// Why.
        reason: String,
    },
}

impl EnqueueOutcome {
    /// Returns true if a work item was pushed.
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueOutcome::Queued { .. })
    }
}

/// Rejects entities whose record is queued with a live work item.
pub struct AlreadyEnqueued {
    tracker: PublisherTracker,
    queue: Arc<dyn WorkQueue<ExportQueueItem>>,
}

impl AlreadyEnqueued {
    /// Creates the rule.
    pub fn new(tracker: PublisherTracker, queue: Arc<dyn WorkQueue<ExportQueueItem>>) -> Self {
        Self { tracker, queue }
    }
}

impl SyncHandler<EligibilityContext> for AlreadyEnqueued {
    fn handle(&self, context: &mut EligibilityContext) -> SyncResult<()> {
        let Some(record) = self.tracker.get(&context.entity.uuid)? else {
            return Ok(());
        };
        if record.status != TrackingStatus::Queued {
            return Ok(());
        }
        if let Some(queue_id) = record.queue_id {
            if self.queue.contains(&queue_id)? {
                context.reject(format!("already queued as {}", queue_id));
            }
        }
        Ok(())
    }
}

/// Rejects entity types that are never exported.
#[derive(Debug, Clone, Default)]
pub struct ExcludeEntityTypes {
    types: HashSet<String>,
}

impl ExcludeEntityTypes {
    /// Excludes the given types.
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }
}

impl SyncHandler<EligibilityContext> for ExcludeEntityTypes {
    fn handle(&self, context: &mut EligibilityContext) -> SyncResult<()> {
        if self.types.contains(&context.entity.entity_type) {
            let reason = format!("entity type {} is excluded", context.entity.entity_type);
            context.reject(reason);
        }
        Ok(())
    }
}

/// Pushes local entities onto the export queue.
pub struct EntityEnqueuer {
    config: SyncConfig,
    tracker: PublisherTracker,
    queue: Arc<dyn WorkQueue<ExportQueueItem>>,
    rules: HandlerChain<EligibilityContext>,
}

impl EntityEnqueuer {
    /// Creates an enqueuer with the already-queued rule installed.
    pub fn new(
        config: SyncConfig,
        tracker: PublisherTracker,
        queue: Arc<dyn WorkQueue<ExportQueueItem>>,
    ) -> Self {
        let mut rules = HandlerChain::new();
        rules.register_with_priority(
            100,
            AlreadyEnqueued::new(tracker.clone(), Arc::clone(&queue)),
        );
        Self {
            config,
            tracker,
            queue,
            rules,
        }
    }

    /// Adds an eligibility rule.
    pub fn with_rule(mut self, rule: impl SyncHandler<EligibilityContext> + 'static) -> Self {
        self.rules.register(rule);
        self
    }

    /// The publisher tracker.
    pub fn tracker(&self) -> &PublisherTracker {
        &self.tracker
    }

    /// Enqueues an entity for export if it is eligible.
    pub fn enqueue(&self, entity: &LocalEntity, operation: EnqueueOperation) -> SyncResult<EnqueueOutcome> {
        let mut context = EligibilityContext::new(entity.clone(), operation);
        if !self.config.is_connected() {
            context.reject("client is not connected to a hub");
        } else if entity.uuid.is_nil() {
            context.reject("entity has no stable identity");
        } else if entity.is_stub() {
            context.reject("entity is a stub");
        } else {
            self.rules.dispatch(&mut context)?;
        }

        match context.reason {
            None => self.push(entity, context.calculate_dependencies),
            Some(reason) => {
                debug!(uuid = %entity.uuid, entity_type = %entity.entity_type, reason = %reason, "Entity not enqueued");
                Ok(EnqueueOutcome::Ineligible { reason })
            }
        }
    }

    /// Removes the tracking record of a locally deleted entity.
    pub fn on_entity_deleted(&self, uuid: &Uuid) -> SyncResult<bool> {
        self.tracker.delete(uuid)
    }

    fn push(&self, entity: &LocalEntity, calculate_dependencies: bool) -> SyncResult<EnqueueOutcome> {
        self.tracker
            .track_queued(&entity.entity_type, entity.id, entity.uuid)?;
        let mut item = ExportQueueItem::new(entity.entity_type.clone(), entity.uuid);
        if !calculate_dependencies {
            item = item.with_calculate_dependencies(false);
        }
        let queue_id = self.queue.push(item)?;
        self.tracker.set_queue_id(&entity.uuid, queue_id.clone())?;
        debug!(uuid = %entity.uuid, queue_id = %queue_id, "Entity enqueued for export");
        Ok(EnqueueOutcome::Queued { queue_id })
    }
}
