//! Collector error types.

use thiserror::Error;

/// Errors raised by the inventory pipeline.
///
/// Configuration and binding variants are never recovered from; they abort the
/// invocation before any sink is touched. Per-record variants are handled by
/// the [`Collector`](crate::pipeline::Collector) according to its policy.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// The raw identifier is not a recognised resource path.
    #[error("invalid resource id: [{0}]")]
    InvalidIdentifier(String),

    /// The identifier is well formed but does not name a stored graph query.
    #[error(
        "invalid resource metadata for [{id}], expected Microsoft.ResourceGraph/queries, got instead: {namespace}/{resource_type}"
    )]
    UnexpectedResourceKind {
        id: String,
        namespace: String,
        resource_type: String,
    },

    /// `resolve_query_text` was called before a graph client was bound.
    #[error("no graph client bound for [{0}], call bind() first")]
    NotBound(String),

    /// The stored query lookup returned no usable row.
    #[error("stored query not found for resource id [{id}]")]
    QueryNotFound { id: String },

    /// The graph service or its transport failed.
    #[error("graph query failed: {0:#}")]
    QueryExecution(#[source] anyhow::Error),

    /// More label fields were requested than the log backend accepts.
    #[error("label cardinality exceeded: {count} labels requested, maximum is {max}: {fields:?}")]
    LabelCardinalityExceeded {
        count: usize,
        max: usize,
        fields: Vec<String>,
    },

    /// No enrichment entity matched the record's key.
    #[error("no enrichment entity found for key [{key}]")]
    EnrichmentNotFound { key: String },

    /// The enrichment store could not be queried.
    #[error("enrichment lookup failed for key [{key}]: {source:#}")]
    EnrichmentLookup {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A sink rejected a publish call.
    #[error("{sink} publish failed: {source:#}")]
    SinkPublish {
        sink: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The object-storage export was asked to write zero records.
    #[error("nothing to export for [{0}]: record set is empty")]
    EmptyExport(String),

    /// A configuration value is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CollectorError {
    /// Wrap a sink transport failure.
    pub fn sink(sink: &'static str, source: anyhow::Error) -> Self {
        Self::SinkPublish { sink, source }
    }

    /// True for errors that are tied to a single record rather than the run.
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            Self::EnrichmentNotFound { .. } | Self::SinkPublish { sink: "loki", .. }
        )
    }
}
