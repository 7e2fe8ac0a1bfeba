//! Stored query resolution
//!
//! A stored graph query only exposes its body through Resource Graph itself,
//! so resolving it is a lookup query scoped to the query's own subscription.

use super::locator::ResourceLocator;
use super::{GraphClient, QueryRequest};
use crate::error::CollectorError;
use serde_json::Value;

/// Resolves the text of a stored graph query
///
/// Starts unbound; [`bind`](Self::bind) attaches a non-owning client
/// reference. Re-binding replaces the previous client.
#[derive(Clone, Copy)]
pub struct QueryResolver<'a> {
    locator: &'a ResourceLocator,
    client: Option<&'a dyn GraphClient>,
}

impl<'a> QueryResolver<'a> {
    pub fn new(locator: &'a ResourceLocator) -> Self {
        Self {
            locator,
            client: None,
        }
    }

    /// Attach the graph client used by [`resolve_query_text`](Self::resolve_query_text)
    pub fn bind(mut self, client: &'a dyn GraphClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn is_bound(&self) -> bool {
        self.client.is_some()
    }

    /// The lookup query that finds the stored query resource
    pub fn lookup_query(&self) -> String {
        format!(
            "resources\n\
             | where type == \"microsoft.resourcegraph/queries\"\n\
             | where subscriptionId == \"{}\"\n\
             | where resourceGroup == \"{}\"\n\
             | where name == \"{}\"",
            escape_literal(self.locator.subscription_id()),
            escape_literal(self.locator.resource_group()),
            escape_literal(self.locator.name()),
        )
    }

    /// Fetch the stored query body.
    ///
    /// Fails with [`CollectorError::NotBound`] when no client is attached and
    /// with [`CollectorError::QueryNotFound`] when the lookup yields no row
    /// carrying a `properties.query` string.
    pub async fn resolve_query_text(&self) -> Result<String, CollectorError> {
        let Some(client) = self.client else {
            return Err(CollectorError::NotBound(
                self.locator.resource_id().to_string(),
            ));
        };

        let query = self.lookup_query();
        tracing::debug!("Performing query:\n---\n{}\n---", query);

        let request = QueryRequest::new(vec![self.locator.subscription_id().to_string()], query);
        let response = client
            .resources(&request)
            .await
            .map_err(CollectorError::QueryExecution)?;

        if response.data.len() > 1 {
            tracing::warn!(
                "stored query lookup for [{}] returned {} rows, using the first",
                self.locator,
                response.data.len()
            );
        }

        response
            .data
            .first()
            .and_then(|row| row.get("properties"))
            .and_then(|props| props.get("query"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CollectorError::QueryNotFound {
                id: self.locator.resource_id().to_string(),
            })
    }
}

/// Escape a value for use inside a double-quoted KQL string literal
fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
