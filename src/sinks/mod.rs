//! Publish sinks
//!
//! - [`loki`] - One log entry per record, labelled by a bounded label set
//! - [`blob`] - One CSV artifact per result set
//!
//! Sinks are independent: a failure in one never stops the others.

pub mod blob;
pub mod loki;

pub use blob::{BlobExporter, ObjectStore};
pub use loki::{LokiAuth, LokiPublisher};

use crate::error::CollectorError;
use crate::graph::Record;
use crate::labels::LabelSet;
use async_trait::async_trait;

/// Per-record log publishing
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Publish one record under `labels`. Each call is independent.
    async fn publish(&self, record: &Record, labels: &LabelSet) -> Result<(), CollectorError>;

    fn name(&self) -> &'static str;
}
