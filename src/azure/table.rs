//! Azure Table storage lookup
//!
//! Backs the [`EntityStore`] used for enrichment.

use super::http::{sanitize_for_log, AzureHttpClient};
use super::storage::{authorize_table, ms_date, StorageAccount, STORAGE_API_VERSION};
use crate::enrich::{Entity, EntityStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// Upper bound on continuation pages followed per lookup
const MAX_PAGES: usize = 100;

#[derive(Deserialize)]
struct QueryPage {
    #[serde(default)]
    value: Vec<Entity>,
}

/// Query access to one table of a storage account
#[derive(Clone)]
pub struct TableStore {
    http: AzureHttpClient,
    account: StorageAccount,
    table: String,
}

impl TableStore {
    pub fn new(http: AzureHttpClient, connection_string: &str, table: &str) -> Result<Self> {
        let account = StorageAccount::from_connection_string(connection_string)
            .context("Failed to parse enrichment storage connection string")?;
        Ok(Self {
            http,
            account,
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl EntityStore for TableStore {
    async fn query_entities(&self, filter: &str) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();
        let mut continuation: Option<(String, Option<String>)> = None;

        for _ in 0..MAX_PAGES {
            let mut url = StorageAccount::service_url(
                self.account.table_endpoint()?,
                &[&format!("{}()", self.table)],
            )?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("$filter", filter);
                if let Some((partition, row)) = &continuation {
                    query.append_pair("NextPartitionKey", partition);
                    if let Some(row) = row {
                        query.append_pair("NextRowKey", row);
                    }
                }
            }
            let signed_url = url.clone();
            self.account.authorize_url(&mut url);

            let date = ms_date(chrono::Utc::now());
            let request = self
                .http
                .inner()
                .get(url.as_str())
                .header("x-ms-date", &date)
                .header("x-ms-version", STORAGE_API_VERSION)
                .header("Accept", "application/json;odata=nometadata")
                .header("DataServiceVersion", "3.0;NetFx");
            let request = authorize_table(&self.account, request, &signed_url, &date)?;

            tracing::debug!("GET table {} filter={}", self.table, filter);
            let response = request.send().await.context("Failed to send request")?;
            let status = response.status();
            let next_partition = header_value(&response, "x-ms-continuation-NextPartitionKey");
            let next_row = header_value(&response, "x-ms-continuation-NextRowKey");
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if !status.is_success() {
                tracing::error!("Table API error: {} - {}", status, sanitize_for_log(&body));
                return Err(anyhow::anyhow!("API request failed: {}", status));
            }

            let page: QueryPage =
                serde_json::from_str(&body).context("Failed to parse table query response")?;
            entities.extend(page.value);

            match next_partition {
                Some(partition) => continuation = Some((partition, next_row)),
                None => return Ok(entities),
            }
        }

        anyhow::bail!(
            "table query on [{}] exceeded {} continuation pages",
            self.table,
            MAX_PAGES
        )
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
