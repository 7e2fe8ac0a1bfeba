//! Inventory query execution

use super::subscriptions::SubscriptionScope;
use super::{GraphClient, QueryRequest, Record};
use crate::error::CollectorError;

/// A resolved inventory query, run once across a whole subscription scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryQuery {
    text: String,
}

impl InventoryQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Run the query in a single request carrying every subscription id.
    ///
    /// No retry happens here; a failed request surfaces as
    /// [`CollectorError::QueryExecution`].
    pub async fn execute(
        &self,
        client: &dyn GraphClient,
        scope: &SubscriptionScope,
    ) -> Result<Vec<Record>, CollectorError> {
        let request = QueryRequest::new(scope.to_vec(), self.text.clone());
        let response = client
            .resources(&request)
            .await
            .map_err(CollectorError::QueryExecution)?;

        tracing::info!(
            "Query results, total: {}, returned: {}",
            response
                .total_records
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            response.data.len()
        );
        if response.skip_token.is_some() {
            tracing::warn!(
                "query result is paged, only the first {} rows were returned",
                response.data.len()
            );
        }
        tracing::debug!("Query results dump:\n---\n{:?}\n---", response.data);

        Ok(response.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::QueryResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGraph {
        requests: Mutex<Vec<QueryRequest>>,
    }

    #[async_trait]
    impl GraphClient for RecordingGraph {
        async fn resources(&self, request: &QueryRequest) -> anyhow::Result<QueryResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let data = request
                .subscriptions
                .iter()
                .map(|s| json!({"subscriptionId": s}).as_object().cloned().unwrap())
                .collect();
            Ok(QueryResponse {
                total_records: Some(request.subscriptions.len() as u64),
                data,
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_single_request_spans_whole_scope() {
        let graph = RecordingGraph::default();
        let scope = SubscriptionScope::new(["S1", "S2"]);
        let rows = InventoryQuery::new("Resources | project id")
            .execute(&graph, &scope)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        let requests = graph.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].subscriptions, vec!["S1", "S2"]);
        assert_eq!(requests[0].query, "Resources | project id");
    }
}
