//! # Syndic CDF
//!
//! Canonical Data Format (CDF) model and wire messages for Syndic.
//!
//! This crate provides:
//! - `CdfObject` for one syndicated unit, with content hashing
//! - `CdfDocument` for ordered, UUID-keyed collections of objects
//! - Typed, language-keyed attributes
//! - Work queue items, republish requests and webhook payloads
//! - Tracking statuses and interest list entries
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attribute;
mod document;
mod error;
mod interest;
mod messages;
mod object;
mod status;

pub use attribute::{AttributeKind, AttributeType, CdfAttribute, LANGUAGE_NONE};
pub use document::CdfDocument;
pub use error::{CdfError, CdfResult};
pub use interest::{InterestEntry, InterestReason, SiteRole};
pub use messages::{
    Crud, ExportQueueItem, ImportQueueItem, RepublishCdf, RepublishRequest, WebhookAsset,
    WebhookPayload, STATUS_SUCCESSFUL,
};
pub use object::{attributes, CdfObject, CdfType};
pub use status::TrackingStatus;

/// Re-exported so downstream crates agree on the identity type.
pub use uuid::Uuid;
