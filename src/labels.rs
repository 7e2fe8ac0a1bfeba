//! Bounded label selection
//!
//! Loki rejects streams that carry too many labels, so the set of record
//! fields promoted to labels is validated once, before anything is published.

use crate::error::CollectorError;
use crate::graph::Record;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Maximum number of dynamic labels accepted by the log backend
pub const MAX_LABELS: usize = 10;

/// Label name to value mapping attached to a published entry
pub type LabelSet = BTreeMap<String, String>;

/// What the label cap is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelCapScope {
    /// Only the caller-declared field list counts towards the cap
    #[default]
    Requested,
    /// Base tags and declared fields together count towards the cap
    Merged,
}

impl FromStr for LabelCapScope {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requested" => Ok(Self::Requested),
            "merged" => Ok(Self::Merged),
            other => Err(CollectorError::Config(format!(
                "unknown label cap scope [{other}], expected 'requested' or 'merged'"
            ))),
        }
    }
}

/// Derives per-record label sets from a validated field list
#[derive(Debug, Clone)]
pub struct LabelSelector {
    base_tags: LabelSet,
    requested: Vec<String>,
}

impl LabelSelector {
    /// Validate the requested field list against `max_labels`.
    ///
    /// With [`LabelCapScope::Merged`] the distinct keys of the base tags and
    /// the requested fields are counted together.
    pub fn new(
        base_tags: LabelSet,
        requested: Vec<String>,
        max_labels: usize,
        scope: LabelCapScope,
    ) -> Result<Self, CollectorError> {
        let count = match scope {
            LabelCapScope::Requested => requested.len(),
            LabelCapScope::Merged => {
                let extra = requested
                    .iter()
                    .filter(|f| !base_tags.contains_key(f.as_str()))
                    .collect::<std::collections::BTreeSet<_>>()
                    .len();
                base_tags.len() + extra
            }
        };

        if count > max_labels {
            return Err(CollectorError::LabelCardinalityExceeded {
                count,
                max: max_labels,
                fields: requested,
            });
        }

        if scope == LabelCapScope::Requested && base_tags.len() + requested.len() > max_labels {
            tracing::warn!(
                "base tags ({}) plus requested labels ({}) exceed the backend limit of {}",
                base_tags.len(),
                requested.len(),
                max_labels
            );
        }

        Ok(Self {
            base_tags,
            requested,
        })
    }

    /// Labels for one record: base tags, overridden by requested string fields
    pub fn select(&self, record: &Record) -> LabelSet {
        let mut labels = self.base_tags.clone();
        for field in &self.requested {
            if let Some(Value::String(value)) = record.get(field) {
                labels.insert(field.clone(), value.clone());
            }
        }
        labels
    }
}

/// One-shot label selection with the cap applied to the requested list
pub fn select_labels(
    record: &Record,
    requested: &[String],
    base_tags: &LabelSet,
    max_labels: usize,
) -> Result<LabelSet, CollectorError> {
    let selector = LabelSelector::new(
        base_tags.clone(),
        requested.to_vec(),
        max_labels,
        LabelCapScope::Requested,
    )?;
    Ok(selector.select(record))
}

/// Split a comma-separated field list, dropping blanks
pub fn parse_field_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
