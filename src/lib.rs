//! Azure Resource Graph inventory collector
//!
//! Resolves stored Resource Graph queries, runs them across every visible
//! subscription, enriches the rows from a side table and publishes them to
//! Loki (one labelled entry per row) and/or Blob storage (one CSV per query).
//!
//! # Module Structure
//!
//! - [`graph`] - Query resolution, subscription scope and execution
//! - [`enrich`] - Keyed enrichment from a side store
//! - [`labels`] - Bounded label selection
//! - [`sinks`] - Loki and Blob publishers
//! - [`pipeline`] - The per-invocation orchestration
//! - [`azure`] - REST adapters for ARM and storage
//! - [`config`] - Settings from environment and config file

pub mod azure;
pub mod config;
pub mod enrich;
pub mod error;
pub mod graph;
pub mod labels;
pub mod pipeline;
pub mod sinks;

pub use error::CollectorError;
