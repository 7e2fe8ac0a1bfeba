//! Loki push sink
//!
//! Every record becomes one log line (the record serialized as JSON) in a
//! stream identified by its label set.

use super::LogSink;
use crate::azure::http::AzureHttpClient;
use crate::error::CollectorError;
use crate::graph::Record;
use crate::labels::LabelSet;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

const SINK: &str = "loki";

/// Body of a Loki push request
#[derive(Debug, Serialize)]
pub struct PushRequest<'a> {
    pub streams: Vec<Stream<'a>>,
}

#[derive(Debug, Serialize)]
pub struct Stream<'a> {
    pub stream: &'a LabelSet,
    /// `[timestamp in nanoseconds as a string, log line]` pairs
    pub values: Vec<[String; 2]>,
}

impl<'a> PushRequest<'a> {
    /// A single-entry push for one record
    pub fn single(
        labels: &'a LabelSet,
        record: &Record,
        at: DateTime<Utc>,
    ) -> serde_json::Result<Self> {
        let line = serde_json::to_string(record)?;
        let nanos = at.timestamp_nanos_opt().unwrap_or_default();
        Ok(Self {
            streams: vec![Stream {
                stream: labels,
                values: vec![[nanos.to_string(), line]],
            }],
        })
    }
}

/// Basic-auth credentials for the push endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct LokiAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LokiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LokiAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Publishes records to a Loki push endpoint
#[derive(Clone)]
pub struct LokiPublisher {
    http: AzureHttpClient,
    endpoint: String,
    auth: Option<LokiAuth>,
}

impl LokiPublisher {
    pub fn new(http: AzureHttpClient, endpoint: &str, auth: Option<LokiAuth>) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
            auth,
        }
    }
}

#[async_trait]
impl LogSink for LokiPublisher {
    async fn publish(&self, record: &Record, labels: &LabelSet) -> Result<(), CollectorError> {
        let body = PushRequest::single(labels, record, Utc::now())
            .context("Failed to encode Loki push body")
            .map_err(|e| CollectorError::sink(SINK, e))?;

        tracing::debug!("TAGS[{}]: {:?}", labels.len(), labels);

        let mut request = self.http.inner().post(&self.endpoint).json(&body);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        self.http.send(request).await.map_err(|e| {
            tracing::error!("Error while publishing on Loki instance: {:#}", e);
            CollectorError::sink(SINK, e)
        })?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        SINK
    }
}
