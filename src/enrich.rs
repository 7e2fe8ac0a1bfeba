//! Record enrichment
//!
//! Joins each inventory row with an entity from a keyed side table and copies
//! a fixed set of fields across. The store handle is created once per run and
//! shared by reference across records.

use crate::error::CollectorError;
use crate::graph::Record;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// An entity returned by the side store
pub type Entity = Map<String, Value>;

/// Default record field used as the lookup key
pub const DEFAULT_KEY_FIELD: &str = "subscriptionId";

/// Default fields copied from the matching entity
pub const DEFAULT_FIELDS: &[&str] = &["pu", "techContact"];

/// A keyed store queried with an OData-style filter expression
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn query_entities(&self, filter: &str) -> Result<Vec<Entity>>;
}

/// Which record field to join on and which entity fields to merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentSpec {
    pub key_field: String,
    pub fields: Vec<String>,
}

impl Default for EnrichmentSpec {
    fn default() -> Self {
        Self {
            key_field: DEFAULT_KEY_FIELD.to_string(),
            fields: DEFAULT_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub struct Enricher<'a> {
    store: &'a dyn EntityStore,
    spec: EnrichmentSpec,
}

impl<'a> Enricher<'a> {
    pub fn new(store: &'a dyn EntityStore, spec: EnrichmentSpec) -> Self {
        Self { store, spec }
    }

    /// Return `record` with the configured entity fields merged in.
    ///
    /// The first matching entity wins and its fields override the record's.
    /// Fields the entity does not carry are left untouched.
    pub async fn enrich(&self, record: Record) -> Result<Record, CollectorError> {
        let Some(key) = record.get(&self.spec.key_field).and_then(Value::as_str) else {
            return Err(CollectorError::EnrichmentNotFound {
                key: format!("<record has no string '{}'>", self.spec.key_field),
            });
        };
        let key = key.to_string();

        let entities = self
            .store
            .query_entities(&row_key_filter(&key))
            .await
            .map_err(|source| CollectorError::EnrichmentLookup {
                key: key.clone(),
                source,
            })?;

        let Some(entity) = entities.into_iter().next() else {
            return Err(CollectorError::EnrichmentNotFound { key });
        };

        Ok(merge_fields(record, &entity, &self.spec.fields))
    }
}

/// Filter expression matching a single row key
pub fn row_key_filter(key: &str) -> String {
    format!("RowKey eq '{}'", key.replace('\'', "''"))
}

/// Copy `fields` from `entity` onto `record`, entity values winning
pub fn merge_fields(mut record: Record, entity: &Entity, fields: &[String]) -> Record {
    for field in fields {
        if let Some(value) = entity.get(field) {
            record.insert(field.clone(), value.clone());
        }
    }
    record
}
