//! Dependency-closure assembly from the hub.

use crate::error::{SyncError, SyncResult};
use crate::republish::Republisher;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use syndic_cdf::{CdfDocument, CdfObject};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fetches published objects from the hub.
pub trait DependencyResolverClient: Send + Sync {
    /// Returns the published objects among `uuids`; absent UUIDs are omitted.
    fn fetch_entities(&self, uuids: &[Uuid]) -> SyncResult<CdfDocument>;
}

/// Fetches objects together with everything they depend on.
pub struct ClosureAssembler {
    resolver: Arc<dyn DependencyResolverClient>,
    republisher: Option<Republisher>,
    batch_size: usize,
    max_rounds: usize,
}

impl ClosureAssembler {
    /// Creates an assembler.
    pub fn new(resolver: Arc<dyn DependencyResolverClient>) -> Self {
        Self {
            resolver,
            republisher: None,
            batch_size: 50,
            max_rounds: 20,
        }
    }

    /// Sends republish requests for incomplete objects.
    pub fn with_republisher(mut self, republisher: Republisher) -> Self {
        self.republisher = Some(republisher);
        self
    }

    /// Sets the number of UUIDs per fetch request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the maximum number of fetch rounds.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Fetches `uuids` and their transitive dependencies.
    ///
    /// An object counts as missing once two consecutive fetches came back
    /// without it. Fails with [`SyncError::ImportValidation`] if anything
    /// requested is missing, after asking the origins of incomplete objects
    /// to republish them, or with [`SyncError::ClosureRoundLimit`] if the
    /// round limit stopped the walk first.
    pub fn assemble(&self, uuids: &[Uuid]) -> SyncResult<CdfDocument> {
        let mut requested: Vec<Uuid> = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        for uuid in uuids {
            if seen.insert(*uuid) {
                requested.push(*uuid);
            }
        }

        let mut document = self.fetch(&requested)?;
        let mut refetched: HashSet<Uuid> = HashSet::new();
        let mut rounds = 1;
        loop {
            let mut next: Vec<Uuid> = document
                .missing_dependencies()
                .into_iter()
                .filter(|uuid| !seen.contains(uuid))
                .collect();
            let absent: Vec<Uuid> = requested
                .iter()
                .filter(|uuid| !document.contains(uuid) && !refetched.contains(uuid))
                .copied()
                .collect();
            if next.is_empty() && absent.is_empty() {
                break;
            }
            if rounds >= self.max_rounds {
                next.extend(absent);
                warn!(rounds, pending = next.len(), "Closure fetch round limit reached");
                return Err(SyncError::ClosureRoundLimit {
                    rounds,
                    pending: next,
                });
            }
            debug!(
                round = rounds + 1,
                count = next.len(),
                again = absent.len(),
                "Fetching dependencies"
            );
            seen.extend(next.iter().copied());
            requested.extend(next.iter().copied());
            refetched.extend(absent.iter().copied());
            next.extend(absent);
            document.merge(self.fetch(&next)?);
            rounds += 1;
        }

        let mut missing: BTreeSet<Uuid> = document.missing_dependencies();
        missing.extend(requested.iter().filter(|uuid| !document.contains(uuid)).copied());
        let missing: Vec<Uuid> = missing.into_iter().collect();
        if missing.is_empty() {
            info!(entities = document.len(), rounds, "Dependency closure assembled");
            return Ok(document);
        }

        for uuid in uuids {
            match document.get(uuid) {
                None => warn!(uuid = %uuid, "Entity is not published"),
                Some(object) if has_missing_dependencies(object, &document) => {
                    warn!(uuid = %uuid, origin = %object.origin, "Dependency closure incomplete");
                    if let Some(republisher) = &self.republisher {
                        republisher.request(object);
                    }
                }
                Some(_) => {}
            }
        }
        Err(SyncError::ImportValidation { missing })
    }

    fn fetch(&self, uuids: &[Uuid]) -> SyncResult<CdfDocument> {
        let mut document = CdfDocument::new();
        for chunk in uuids.chunks(self.batch_size) {
            document.merge(self.resolver.fetch_entities(chunk)?);
        }
        Ok(document)
    }
}

impl std::fmt::Debug for ClosureAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureAssembler")
            .field("republisher", &self.republisher)
            .field("batch_size", &self.batch_size)
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

/// Returns true if the object transitively depends on something absent.
fn has_missing_dependencies(object: &CdfObject, document: &CdfDocument) -> bool {
    let mut visited: HashSet<Uuid> = HashSet::from([object.uuid]);
    let mut stack: Vec<Uuid> = object.dependency_uuids();
    while let Some(uuid) = stack.pop() {
        if !visited.insert(uuid) {
            continue;
        }
        match document.get(&uuid) {
            None => return true,
            Some(dependency) => stack.extend(dependency.dependencies.keys().copied()),
        }
    }
    false
}
