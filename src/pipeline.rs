//! Collection pipeline
//!
//! One invocation resolves every configured stored query, runs it across the
//! current subscription scope, enriches the rows and fans them out to the
//! enabled sinks. Queries are processed one after another; nothing is
//! rolled back when a later query fails.

use crate::config::LabelSettings;
use crate::enrich::Enricher;
use crate::error::CollectorError;
use crate::graph::{
    list_subscriptions, GraphClient, InventoryQuery, QueryResolver, Record, ResourceLocator,
    SubscriptionScope, SubscriptionSource,
};
use crate::labels::{LabelSelector, LabelSet, MAX_LABELS};
use crate::sinks::{BlobExporter, LogSink};
use tracing::Instrument;

/// Outcome of one stored query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryReport {
    pub query: String,
    pub records: usize,
    pub enrichment_misses: usize,
    pub published: usize,
    pub publish_failures: usize,
    pub artifact: Option<String>,
    /// Sink-level failures; the other sinks still ran
    pub sink_errors: Vec<String>,
}

/// Outcome of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub queries: Vec<QueryReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.queries.iter().all(|q| q.sink_errors.is_empty())
    }

    pub fn total_records(&self) -> usize {
        self.queries.iter().map(|q| q.records).sum()
    }
}

/// Base tags attached to every entry published for `locator`
pub fn base_tags(inventory_type: &str, locator: &ResourceLocator) -> LabelSet {
    LabelSet::from([
        ("inventory_type".to_string(), inventory_type.to_string()),
        ("graph_query_name".to_string(), locator.name().to_string()),
    ])
}

/// Orchestrates resolve, query, enrich and publish
pub struct Collector<'a> {
    graph: &'a dyn GraphClient,
    subscriptions: &'a dyn SubscriptionSource,
    labels: LabelSettings,
    max_labels: usize,
    enricher: Option<Enricher<'a>>,
    log_sink: Option<&'a dyn LogSink>,
    exporter: Option<BlobExporter>,
}

impl<'a> Collector<'a> {
    pub fn new(
        graph: &'a dyn GraphClient,
        subscriptions: &'a dyn SubscriptionSource,
        labels: LabelSettings,
    ) -> Self {
        Self {
            graph,
            subscriptions,
            labels,
            max_labels: MAX_LABELS,
            enricher: None,
            log_sink: None,
            exporter: None,
        }
    }

    pub fn with_max_labels(mut self, max_labels: usize) -> Self {
        self.max_labels = max_labels;
        self
    }

    pub fn with_enricher(mut self, enricher: Enricher<'a>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_log_sink(mut self, sink: &'a dyn LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn with_exporter(mut self, exporter: BlobExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Run every query once.
    ///
    /// Label limits are validated for all queries before the first network
    /// call, so a bad field list never results in a partial publish. The
    /// subscription scope is listed once and shared by every query.
    pub async fn run(&self, queries: &[ResourceLocator]) -> Result<RunReport, CollectorError> {
        let selectors = queries
            .iter()
            .map(|locator| {
                LabelSelector::new(
                    base_tags(&self.labels.inventory_type, locator),
                    self.labels.fields.clone(),
                    self.max_labels,
                    self.labels.cap_scope,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        if self.log_sink.is_none() && self.exporter.is_none() {
            tracing::warn!("no sink enabled, results will only be logged");
        }

        let mut report = RunReport::default();
        if queries.is_empty() {
            return Ok(report);
        }

        let scope = list_subscriptions(self.subscriptions).await?;
        for (locator, selector) in queries.iter().zip(&selectors) {
            let span = tracing::info_span!("query", name = %locator.name());
            match self.run_query(locator, selector, &scope).instrument(span).await {
                Ok(query_report) => report.queries.push(query_report),
                Err(e) => {
                    for done in &report.queries {
                        tracing::warn!(
                            "query [{}] already published {} records before [{}] failed",
                            done.query,
                            done.published,
                            locator.name()
                        );
                    }
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    async fn run_query(
        &self,
        locator: &ResourceLocator,
        selector: &LabelSelector,
        scope: &SubscriptionScope,
    ) -> Result<QueryReport, CollectorError> {
        let mut report = QueryReport {
            query: locator.name().to_string(),
            ..Default::default()
        };

        tracing::info!("retrieving graph query from resource id: [{}]", locator);
        let text = QueryResolver::new(locator)
            .bind(self.graph)
            .resolve_query_text()
            .await?;
        tracing::debug!("loaded query:\n---\n{}\n---", text);

        let rows = InventoryQuery::new(text).execute(self.graph, scope).await?;
        report.records = rows.len();

        let rows = self.enrich_all(rows, &mut report).await?;

        if let Some(sink) = self.log_sink {
            self.publish_logs(sink, &rows, selector, &mut report).await;
        }

        if let Some(exporter) = &self.exporter {
            match exporter.publish(locator.name(), &rows).await {
                Ok(name) => report.artifact = Some(name),
                Err(CollectorError::EmptyExport(name)) => {
                    tracing::warn!("query [{}] returned no rows, skipping blob export", name);
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    report.sink_errors.push(e.to_string());
                }
            }
        }

        tracing::info!(
            records = report.records,
            published = report.published,
            publish_failures = report.publish_failures,
            "query complete"
        );
        Ok(report)
    }

    /// Enrich every row; a miss keeps the row as is unless every row missed
    async fn enrich_all(
        &self,
        rows: Vec<Record>,
        report: &mut QueryReport,
    ) -> Result<Vec<Record>, CollectorError> {
        let Some(enricher) = &self.enricher else {
            return Ok(rows);
        };

        let total = rows.len();
        let mut first_miss = None;
        let mut enriched = Vec::with_capacity(total);

        for row in rows {
            match enricher.enrich(row.clone()).await {
                Ok(record) => enriched.push(record),
                Err(e) if e.is_per_record() => {
                    tracing::warn!("{}, publishing as is", e);
                    report.enrichment_misses += 1;
                    first_miss.get_or_insert(e);
                    enriched.push(row);
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(e) = first_miss.filter(|_| report.enrichment_misses == total) {
            tracing::error!("enrichment failed for all {} records", total);
            return Err(e);
        }

        Ok(enriched)
    }

    /// Fire-and-continue: one rejected entry never blocks the rest, a
    /// sink-level failure stops publishing for this query
    async fn publish_logs(
        &self,
        sink: &dyn LogSink,
        rows: &[Record],
        selector: &LabelSelector,
        report: &mut QueryReport,
    ) {
        for row in rows {
            let labels = selector.select(row);
            tracing::debug!("Logging entry:\n---\n{}\n---", serde_json::Value::from(row.clone()));
            match sink.publish(row, &labels).await {
                Ok(()) => report.published += 1,
                Err(e) if e.is_per_record() => {
                    tracing::warn!("skipping record: {}", e);
                    report.publish_failures += 1;
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    report.sink_errors.push(e.to_string());
                    return;
                }
            }
        }

        if !rows.is_empty() && report.published == 0 {
            report.sink_errors.push(format!(
                "{}: all {} publishes failed",
                sink.name(),
                rows.len()
            ));
        }
    }
}
