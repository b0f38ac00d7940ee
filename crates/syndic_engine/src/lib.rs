//! # Syndic Engine
//!
//! Publish/subscribe engine for syndicating CDF documents between
//! independent repositories.
//!
//! This crate provides:
//! - Dependency-ordered ingestion with stub tracking and failure recovery
//! - Dependency-closure assembly with republish requests
//! - Serialization of local entities into CDF objects
//! - Publisher and subscriber tracking tables (memory and file backed)
//! - Export enqueueing with pluggable eligibility rules
//! - Export and import queue workers with retry and backoff
//! - Interest list reconciliation, webhook dispatch and audits
//!
//! ## Architecture
//!
//! The engine never touches storage or the network directly. The host
//! repository is reached through [`EntityHost`], [`CapabilityRegistry`] and
//! [`DependencyCalculator`]; the hub through [`DependencyResolverClient`],
//! [`ExportTarget`], [`InterestListClient`] and [`WebhookDirectory`].
//!
//! ## Key Invariants
//!
//! - An object is materialized only after all of its dependencies
//! - Tracking records are upserted one row at a time, keyed by UUID
//! - A null tracked hash forces the next export or import
//! - Work items are delivered at least once; every worker is safe to re-run

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod audit;
mod closure;
mod config;
mod context;
mod enqueue;
mod entity;
mod error;
mod export;
mod file_store;
mod handlers;
mod host;
mod http;
mod import;
mod ingest;
mod interest;
mod memory;
mod poller;
mod queue;
mod republish;
mod serializer;
mod stack;
mod stub;
mod tracker;
mod webhook;

pub use audit::{AuditFinding, AuditReport, Auditor};
pub use closure::{ClosureAssembler, DependencyResolverClient};
pub use config::{RetryConfig, SyncConfig};
pub use context::ImportContext;
pub use enqueue::{
    AlreadyEnqueued, EligibilityContext, EnqueueOperation, EnqueueOutcome, EntityEnqueuer,
    ExcludeEntityTypes,
};
pub use entity::{EntityKind, EntityRef, EntityState, LocalEntity};
pub use error::{SyncError, SyncResult};
pub use export::{ExportReport, ExportTarget, ExportWorker, PublishContext, UnmodifiedPruner};
pub use file_store::FileTrackingStore;
pub use handlers::{HandlerChain, HandlerContext, SyncHandler};
pub use host::{
    CapabilityRegistry, DependencyCalculator, DependencyWrapper, EntityHost, Resolution,
    StaticCapabilities,
};
pub use http::{
    HttpClient, HttpResponse, LoopbackClient, LoopbackServer, RecordedRequest, RecordingHttpClient,
};
pub use import::ImportWorker;
pub use ingest::{
    DropUnresolved, FailureContext, IngestReport, IngestionEngine, LanguagePruner, PruneContext,
    RecoveryAction,
};
pub use interest::{InterestListClient, InterestManager, InterestSyncReport};
pub use memory::{MemoryEntityHost, ReferenceCalculator, STUB_ENTITY_TYPE};
pub use poller::QueuePoller;
pub use queue::{
    drain, process_next, DrainStats, MemoryQueue, QueueItem, QueueWorker, WorkOutcome, WorkQueue,
};
pub use republish::{Republisher, WebhookDirectory};
pub use serializer::{link_dependency_hashes, PopulateContext, Serializer};
pub use stack::{DependencyStack, StackEntry};
pub use stub::StubLedger;
pub use tracker::{
    MemoryTrackingStore, PublisherTracker, SubscriberTracker, TrackingFilter, TrackingRecord,
    TrackingStore,
};
pub use webhook::{DispatchOutcome, WebhookDispatcher};
