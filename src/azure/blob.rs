//! Azure Blob storage upload
//!
//! Backs the [`ObjectStore`] used by the CSV export sink.

use super::http::AzureHttpClient;
use super::storage::{
    authorize_blob, ms_date, BlobRequestParts, StorageAccount, STORAGE_API_VERSION,
};
use crate::sinks::blob::ObjectStore;
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Block blob uploads into one container
#[derive(Clone)]
pub struct AzureBlobStore {
    http: AzureHttpClient,
    account: StorageAccount,
    container: String,
}

impl AzureBlobStore {
    pub fn new(http: AzureHttpClient, connection_string: &str, container: &str) -> Result<Self> {
        let account = StorageAccount::from_connection_string(connection_string)
            .context("Failed to parse blob storage connection string")?;
        Ok(Self {
            http,
            account,
            container: container.to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    async fn upload(&self, name: &str, content_type: &str, data: Vec<u8>) -> Result<()> {
        let signed_url =
            StorageAccount::service_url(self.account.blob_endpoint()?, &[&self.container, name])?;
        let mut url = signed_url.clone();
        self.account.authorize_url(&mut url);

        let date = ms_date(chrono::Utc::now());
        let ms_headers = [
            ("x-ms-blob-type", "BlockBlob"),
            ("x-ms-date", date.as_str()),
            ("x-ms-version", STORAGE_API_VERSION),
        ];

        let mut request = self
            .http
            .inner()
            .put(url.as_str())
            .header("Content-Type", content_type);
        for (key, value) in ms_headers {
            request = request.header(key, value);
        }

        let parts = BlobRequestParts {
            verb: "PUT",
            content_length: data.len(),
            content_type,
            ms_headers: &ms_headers,
            url: &signed_url,
        };
        let request = authorize_blob(&self.account, request, &parts)?;

        tracing::debug!("PUT blob {}/{}", self.container, name);
        self.http.send(request.body(data)).await?;
        Ok(())
    }

    fn location(&self) -> String {
        format!("Azure blob container: {}", self.container)
    }
}
