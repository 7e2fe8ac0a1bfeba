//! Resource identifier parsing
//!
//! Validates that a configured resource id names a stored Resource Graph
//! query before anything touches the network.

use crate::error::CollectorError;
use std::fmt;
use std::str::FromStr;

/// Provider namespace of stored graph queries
pub const QUERY_NAMESPACE: &str = "Microsoft.ResourceGraph";

/// Resource type of stored graph queries
pub const QUERY_TYPE: &str = "queries";

/// A validated `Microsoft.ResourceGraph/queries` resource id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocator {
    raw: String,
    subscription_id: String,
    resource_group: String,
    resource_namespace: String,
    resource_type: String,
    resource_name: String,
}

impl ResourceLocator {
    /// Parse and validate a raw resource id.
    ///
    /// The path must have the shape
    /// `/subscriptions/{s}/resourceGroups/{g}/providers/{namespace}/{type}/{name}`.
    /// Keywords are matched case-insensitively, every segment must be
    /// non-empty and nested child resources are rejected.
    pub fn parse(raw: &str) -> Result<Self, CollectorError> {
        let invalid = || CollectorError::InvalidIdentifier(raw.to_string());

        let trimmed = raw.trim();
        let Some(path) = trimmed.strip_prefix('/') else {
            return Err(invalid());
        };

        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() != 8 || segments.iter().any(|s| !is_valid_segment(s)) {
            return Err(invalid());
        }

        let keywords_match = segments[0].eq_ignore_ascii_case("subscriptions")
            && segments[2].eq_ignore_ascii_case("resourceGroups")
            && segments[4].eq_ignore_ascii_case("providers");
        if !keywords_match {
            return Err(invalid());
        }

        let locator = Self {
            raw: trimmed.to_string(),
            subscription_id: segments[1].to_string(),
            resource_group: segments[3].to_string(),
            resource_namespace: segments[5].to_string(),
            resource_type: segments[6].to_string(),
            resource_name: segments[7].to_string(),
        };

        if locator.resource_namespace != QUERY_NAMESPACE || locator.resource_type != QUERY_TYPE {
            return Err(CollectorError::UnexpectedResourceKind {
                id: locator.raw,
                namespace: locator.resource_namespace,
                resource_type: locator.resource_type,
            });
        }

        tracing::debug!(
            subscription = %locator.subscription_id,
            resource_group = %locator.resource_group,
            name = %locator.resource_name,
            "parsed graph query resource id"
        );

        Ok(locator)
    }

    /// Stored query name
    pub fn name(&self) -> &str {
        &self.resource_name
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn namespace(&self) -> &str {
        &self.resource_namespace
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The id exactly as configured (surrounding whitespace removed)
    pub fn resource_id(&self) -> &str {
        &self.raw
    }
}

/// Segments may not be empty, padded, or contain characters that would
/// break out of a query string literal.
fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.trim() == segment
        && !segment.contains(['"', '\\', '?', '#'])
}

impl FromStr for ResourceLocator {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split a comma-separated list of resource ids, validating every entry.
pub fn parse_locator_list(raw: &str) -> Result<Vec<ResourceLocator>, CollectorError> {
    let locators = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ResourceLocator::parse)
        .collect::<Result<Vec<_>, _>>()?;

    if locators.is_empty() {
        return Err(CollectorError::Config(
            "no graph query resource id configured".to_string(),
        ));
    }
    Ok(locators)
}
