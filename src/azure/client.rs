//! Azure Resource Manager client
//!
//! Combines authentication and HTTP functionality, and implements the graph
//! traits the pipeline consumes.

use super::auth::AzureCredentials;
use super::http::AzureHttpClient;
use crate::graph::{GraphClient, QueryRequest, QueryResponse, SubscriptionSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Default ARM endpoint
pub const DEFAULT_ARM_URL: &str = "https://management.azure.com";

const RESOURCE_GRAPH_API_VERSION: &str = "2021-03-01";
const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";

/// Upper bound on `nextLink` pages followed while listing subscriptions
const MAX_SUBSCRIPTION_PAGES: usize = 1000;

/// Main ARM client
#[derive(Clone)]
pub struct AzureClient {
    pub credentials: AzureCredentials,
    pub http: AzureHttpClient,
    base_url: String,
}

impl AzureClient {
    pub fn new(credentials: AzureCredentials, http: AzureHttpClient, base_url: &str) -> Self {
        Self {
            credentials,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request to an ARM API
    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.credentials.get_token().await?;
        let request = self
            .http
            .inner()
            .get(url)
            .bearer_auth(token)
            .header("x-ms-client-request-id", uuid::Uuid::new_v4().to_string());
        tracing::debug!("GET {}", url);
        self.http.send_json(request).await
    }

    /// Make a POST request to an ARM API
    pub async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        let token = self.credentials.get_token().await?;
        let request = self
            .http
            .inner()
            .post(url)
            .bearer_auth(token)
            .header("x-ms-client-request-id", uuid::Uuid::new_v4().to_string())
            .json(body);
        tracing::debug!("POST {}", url);
        self.http.send_json(request).await
    }

    // =========================================================================
    // URL helpers
    // =========================================================================

    /// Build Resource Graph query URL
    pub fn resource_graph_url(&self) -> String {
        format!(
            "{}/providers/Microsoft.ResourceGraph/resources?api-version={}",
            self.base_url, RESOURCE_GRAPH_API_VERSION
        )
    }

    /// Build subscription listing URL
    pub fn subscriptions_url(&self) -> String {
        format!(
            "{}/subscriptions?api-version={}",
            self.base_url, SUBSCRIPTIONS_API_VERSION
        )
    }
}

#[async_trait]
impl GraphClient for AzureClient {
    async fn resources(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let body = serde_json::to_value(request).context("Failed to encode graph query")?;
        let response = self.post(&self.resource_graph_url(), &body).await?;
        serde_json::from_value(response).context("Failed to decode graph query response")
    }
}

#[async_trait]
impl SubscriptionSource for AzureClient {
    async fn subscription_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut next = Some(self.subscriptions_url());
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_SUBSCRIPTION_PAGES {
                anyhow::bail!("subscription listing exceeded {} pages", MAX_SUBSCRIPTION_PAGES);
            }

            let response = self.get(&url).await?;
            ids.extend(
                response
                    .get("value")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|s| s.get("subscriptionId").and_then(Value::as_str))
                    .map(str::to_string),
            );
            next = response
                .get("nextLink")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
        }

        Ok(ids)
    }
}
