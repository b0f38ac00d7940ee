//! # Syndic Hub
//!
//! In-memory reference content hub for Syndic.
//!
//! This crate provides:
//! - Client and webhook registration
//! - Storage of the latest published version of every object
//! - Per-webhook interest lists, one per site role
//! - Webhook notifications queued on publish and delete
//! - [`HubClient`], which implements the engine's hub-facing traits
//!
//! ## Delivery
//!
//! Notifications are collected in an outbox and sent by
//! [`ContentHub::deliver_pending`] through any [`syndic_engine::HttpClient`].
//! A failed delivery is logged and dropped; subscribers recover through
//! their own audits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod hub;

pub use client::HubClient;
pub use config::HubConfig;
pub use error::{HubError, HubResult};
pub use hub::{ClientRecord, ContentHub, Delivery, DeliveryReport, WebhookRecord};
