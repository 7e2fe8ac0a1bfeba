//! Azure API interaction module
//!
//! Thin REST adapters behind the traits the pipeline consumes.
//!
//! # Module Structure
//!
//! - [`auth`] - Access tokens (service principal, managed identity, static)
//! - [`client`] - ARM client implementing the graph traits
//! - [`http`] - HTTP utilities for REST API calls
//! - [`storage`] - Storage connection strings and request signing
//! - [`table`] - Table storage lookups for enrichment
//! - [`blob`] - Blob uploads for the CSV export

pub mod auth;
pub mod blob;
pub mod client;
pub mod http;
pub mod storage;
pub mod table;
