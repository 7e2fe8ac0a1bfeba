//! Azure Resource Graph interaction
//!
//! This module resolves stored graph queries and runs them across the
//! subscriptions visible to the active credential.
//!
//! # Module Structure
//!
//! - [`locator`] - Resource id parsing and validation
//! - [`resolver`] - Stored query text lookup (bind-then-resolve)
//! - [`subscriptions`] - Subscription scope enumeration
//! - [`inventory`] - Inventory query execution
//!
//! The service itself sits behind the [`GraphClient`] and
//! [`SubscriptionSource`] traits; [`crate::azure::client::AzureClient`]
//! implements both over the ARM REST API.
//!
//! # Example
//!
//! ```ignore
//! use rgcollector::graph::{InventoryQuery, QueryResolver, ResourceLocator};
//!
//! async fn example(client: &AzureClient) -> anyhow::Result<()> {
//!     let locator = ResourceLocator::parse(&std::env::var("RESOURCE_GRAPH_QUERY_ID")?)?;
//!     let text = QueryResolver::new(&locator).bind(client).resolve_query_text().await?;
//!     let scope = list_subscriptions(client).await?;
//!     let rows = InventoryQuery::new(text).execute(client, &scope).await?;
//!     Ok(())
//! }
//! ```

pub mod inventory;
pub mod locator;
pub mod resolver;
pub mod subscriptions;

pub use inventory::InventoryQuery;
pub use locator::{parse_locator_list, ResourceLocator};
pub use resolver::QueryResolver;
pub use subscriptions::{list_subscriptions, SubscriptionScope};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One result row, keyed by the column names the query projects
pub type Record = Map<String, Value>;

/// Request body for the Resource Graph `resources` operation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryRequest {
    pub subscriptions: Vec<String>,
    pub query: String,
    pub options: QueryRequestOptions,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequestOptions {
    pub result_format: String,
}

impl QueryRequest {
    pub fn new(subscriptions: Vec<String>, query: impl Into<String>) -> Self {
        Self {
            subscriptions,
            query: query.into(),
            options: QueryRequestOptions {
                result_format: "objectArray".to_string(),
            },
        }
    }
}

/// Response body of the Resource Graph `resources` operation
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub total_records: Option<u64>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub data: Vec<Record>,
    #[serde(default, rename = "$skipToken")]
    pub skip_token: Option<String>,
}

/// Executes graph queries
#[async_trait]
pub trait GraphClient: Send + Sync {
    async fn resources(&self, request: &QueryRequest) -> Result<QueryResponse>;
}

/// Lists the subscriptions visible to the active credential
///
/// Implementations return the complete list; paging is their concern.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn subscription_ids(&self) -> Result<Vec<String>>;
}
