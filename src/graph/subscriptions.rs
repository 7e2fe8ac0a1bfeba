//! Subscription scope
//!
//! The fan-out scope for an inventory query: every subscription the
//! credential can see, enumerated fresh on every run.

use super::SubscriptionSource;
use crate::error::CollectorError;
use std::collections::HashSet;

/// Ordered set of subscription ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionScope {
    ids: Vec<String>,
}

impl SubscriptionScope {
    /// Build a scope, dropping blanks and duplicates while keeping first-seen order
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let ids = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &String| !id.is_empty())
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self { ids }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.ids.clone()
    }
}

/// Enumerate every subscription visible to the active credential
pub async fn list_subscriptions(
    source: &dyn SubscriptionSource,
) -> Result<SubscriptionScope, CollectorError> {
    let ids = source
        .subscription_ids()
        .await
        .map_err(CollectorError::QueryExecution)?;
    let raw_count = ids.len();
    let scope = SubscriptionScope::new(ids);

    if scope.len() != raw_count {
        tracing::debug!(
            "dropped {} duplicate subscription ids",
            raw_count - scope.len()
        );
    }
    tracing::info!("target subscriptions total: {}", scope.len());
    tracing::debug!("target subscriptions dump: {:?}", scope.ids());

    Ok(scope)
}
