//! Stub bookkeeping for one ingestion run.

use crate::context::ImportContext;
use crate::host::EntityHost;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StubRecord {
    entity_type: String,
    filled: bool,
}

/// Placeholders created while populating references.
///
/// Stubs that are still unfilled when a run fails are deleted so a failed
/// import leaves no half-made entities behind.
#[derive(Debug, Default)]
pub struct StubLedger {
    stubs: BTreeMap<Uuid, StubRecord>,
}

impl StubLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a stub created by the host.
    pub fn record(&mut self, entity_type: impl Into<String>, uuid: Uuid) {
        self.stubs.entry(uuid).or_insert_with(|| StubRecord {
            entity_type: entity_type.into(),
            filled: false,
        });
    }

    /// Marks a stub as filled; unknown UUIDs are ignored.
    pub fn mark_filled(&mut self, uuid: &Uuid) {
        if let Some(stub) = self.stubs.get_mut(uuid) {
            stub.filled = true;
        }
    }

    /// Returns true if the UUID was stubbed during this run.
    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.stubs.contains_key(uuid)
    }

    /// UUIDs of stubs that were never filled.
    pub fn unfilled(&self) -> Vec<Uuid> {
        self.stubs
            .iter()
            .filter(|(_, stub)| !stub.filled)
            .map(|(uuid, _)| *uuid)
            .collect()
    }

    /// Number of stubs recorded.
    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    /// Returns true if no stubs were recorded.
    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// Ends the run.
    ///
    /// With `force`, unfilled stubs are deleted through the host. Deletion
    /// failures are logged and do not mask the original error.
    /// Returns the number of stubs deleted.
    pub fn cleanup(&mut self, host: &dyn EntityHost, force: bool) -> usize {
        let mut deleted = 0;
        if force {
            let context = ImportContext::local_edit();
            for (uuid, stub) in self.stubs.iter().filter(|(_, stub)| !stub.filled) {
                match host.delete(&stub.entity_type, uuid, &context) {
                    Ok(true) => {
                        debug!(uuid = %uuid, entity_type = %stub.entity_type, "Deleted unfilled stub");
                        deleted += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(uuid = %uuid, error = %e, "Failed to delete unfilled stub");
                    }
                }
            }
        }
        self.stubs.clear();
        deleted
    }
}
