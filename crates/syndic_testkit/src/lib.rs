//! # Syndic Testkit
//!
//! Test utilities for Syndic.
//!
//! This crate provides:
//! - Fixtures for hashed CDF objects and local entity graphs
//! - Property-based generators for acyclic documents using proptest
//! - An in-process network of a hub and fully wired sites
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syndic_testkit::prelude::*;
//!
//! #[test]
//! fn publish_and_subscribe() {
//!     let network = TestNetwork::new(HubConfig::default());
//!     let publisher = network.add_site("publisher", uuid(0xA)).unwrap();
//!     let subscriber = network.add_site("subscriber", uuid(0xB)).unwrap();
//!     // ... create entities, settle the network, check the subscriber
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod network;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::network::*;
    pub use syndic_hub::HubConfig;
}

pub use fixtures::*;
pub use generators::*;
pub use network::*;
