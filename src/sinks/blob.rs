//! Object-storage export
//!
//! Writes a whole result set as one semicolon-delimited CSV artifact.

use crate::error::CollectorError;
use crate::graph::Record;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

const SINK: &str = "blob";

/// CSV column delimiter
pub const DELIMITER: u8 = b';';

/// Destination for exported artifacts
///
/// Uploading a name that already exists overwrites it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, name: &str, content_type: &str, data: Vec<u8>) -> Result<()>;

    /// Human-readable location, used in logs
    fn location(&self) -> String;
}

/// Exports record sets to an [`ObjectStore`]
#[derive(Clone)]
pub struct BlobExporter {
    store: Arc<dyn ObjectStore>,
}

impl BlobExporter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Export `records` as `{name}-{UTC timestamp}.csv`, returning the artifact name
    pub async fn publish(&self, name: &str, records: &[Record]) -> Result<String, CollectorError> {
        self.publish_at(name, records, Utc::now()).await
    }

    pub async fn publish_at(
        &self,
        name: &str,
        records: &[Record],
        now: DateTime<Utc>,
    ) -> Result<String, CollectorError> {
        if records.is_empty() {
            return Err(CollectorError::EmptyExport(name.to_string()));
        }

        let filename = artifact_name(name, now);
        let data = to_csv(records).map_err(|e| CollectorError::sink(SINK, e))?;

        tracing::info!(
            "Upload {} ({} rows) into {}",
            filename,
            records.len(),
            self.store.location()
        );
        self.store
            .upload(&filename, "text/csv; charset=utf-8", data)
            .await
            .map_err(|e| CollectorError::sink(SINK, e))?;

        Ok(filename)
    }
}

/// `{name}-{YYYYmmdd-HHMMSS}.csv`
pub fn artifact_name(name: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}.csv", name, now.format("%Y%m%d-%H%M%S"))
}

/// Render records as CSV; the header is the first record's keys, in order.
///
/// Later records missing a column get an empty cell; keys absent from the
/// first record are dropped.
pub fn to_csv(records: &[Record]) -> Result<Vec<u8>> {
    let Some(first) = records.first() else {
        anyhow::bail!("cannot derive a CSV header from zero records");
    };
    let header: Vec<&str> = first.keys().map(String::as_str).collect();

    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .from_writer(Vec::new());
    writer
        .write_record(&header)
        .context("Failed to write CSV header")?;

    for (index, record) in records.iter().enumerate() {
        let dropped = record.keys().filter(|k| !first.contains_key(*k)).count();
        if dropped > 0 {
            tracing::debug!("row {} has {} columns not in the header", index, dropped);
        }
        let row: Vec<String> = header.iter().map(|k| cell(record.get(*k))).collect();
        writer.write_record(&row).context("Failed to write CSV row")?;
    }

    writer.into_inner().context("Failed to flush CSV output")
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
