//! Import worker: fetches dependency closures and ingests them.

use crate::closure::ClosureAssembler;
use crate::error::SyncResult;
use crate::ingest::{IngestReport, IngestionEngine};
use crate::interest::InterestManager;
use crate::queue::{QueueItem, QueueWorker, WorkOutcome};
use crate::stack::DependencyStack;
use syndic_cdf::{ImportQueueItem, InterestReason, SiteRole, TrackingStatus};
use tracing::{info, warn};
use uuid::Uuid;

/// Processes import work items.
#[derive(Debug)]
pub struct ImportWorker {
    assembler: ClosureAssembler,
    engine: IngestionEngine,
    interests: Option<InterestManager>,
}

impl ImportWorker {
    /// Creates a worker.
    pub fn new(assembler: ClosureAssembler, engine: IngestionEngine) -> Self {
        Self {
            assembler,
            engine,
            interests: None,
        }
    }

    /// Adds imported entities to the subscriber interest list.
    pub fn with_interest_manager(mut self, interests: InterestManager) -> Self {
        self.interests = Some(interests);
        self
    }

    /// The ingestion engine.
    pub fn engine(&self) -> &IngestionEngine {
        &self.engine
    }

    /// Imports the given UUIDs and everything they depend on.
    pub fn import(&self, uuids: &[Uuid]) -> SyncResult<IngestReport> {
        let document = self.assembler.assemble(uuids)?;
        let mut stack = DependencyStack::new();
        let report = self.engine.ingest(document, &mut stack)?;

        if let Some(interests) = &self.interests {
            let tracked: Vec<Uuid> = report
                .materialized
                .iter()
                .chain(report.unchanged.iter())
                .copied()
                .collect();
            if let Err(e) = interests.add(
                &tracked,
                SiteRole::Subscriber,
                InterestReason::ImportSuccessful,
                TrackingStatus::Imported,
            ) {
                warn!(count = tracked.len(), error = %e, "Failed to update subscriber interest list");
            }
        }
        info!(
            requested = uuids.len(),
            materialized = report.materialized.len(),
            unchanged = report.unchanged.len(),
            "Import complete"
        );
        Ok(report)
    }
}

impl QueueWorker<ImportQueueItem> for ImportWorker {
    fn process(&self, item: &QueueItem<ImportQueueItem>) -> WorkOutcome {
        let uuids = match item.payload.uuid_list() {
            Ok(uuids) => uuids,
            Err(e) => return WorkOutcome::Drop(e.to_string()),
        };
        match self.import(&uuids) {
            Ok(_) => WorkOutcome::Success,
            Err(e) => WorkOutcome::from_error(&e),
        }
    }
}
