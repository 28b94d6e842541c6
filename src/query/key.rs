use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{CostDrillError, Result};
use crate::models::{CollectionFilter, Granularity, ResourceMetadata, TimeRange};

const KEY_FORMAT_VERSION: u8 = 1;

/// What a cost query applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    /// A single resource id
    Resource { id: String },
    /// Every resource in a region, optionally of one type
    Collection {
        region: String,
        resource_type: Option<String>,
    },
}

impl Scope {
    pub fn resource(id: &str) -> Self {
        Scope::Resource { id: id.to_string() }
    }

    pub fn region(region: &str) -> Self {
        Scope::Collection {
            region: region.to_string(),
            resource_type: None,
        }
    }

    pub fn region_and_type(region: &str, resource_type: &str) -> Self {
        Scope::Collection {
            region: region.to_string(),
            resource_type: Some(resource_type.to_string()),
        }
    }

    /// Stable lower-case rendering used as the cache key prefix
    pub fn canonical(&self) -> String {
        match self {
            Scope::Resource { id } => format!("resource:{}", normalize_identifier(id)),
            Scope::Collection {
                region,
                resource_type: None,
            } => format!("region:{}", normalize_identifier(region)),
            Scope::Collection {
                region,
                resource_type: Some(resource_type),
            } => format!(
                "region:{}/type:{}",
                normalize_identifier(region),
                normalize_identifier(resource_type)
            ),
        }
    }

    /// Prefix shared by every key built for this scope
    pub fn key_prefix(&self) -> String {
        format!("{}#", self.canonical())
    }

    /// Whether `resource` belongs to this scope, ignoring case and padding
    pub fn covers(&self, resource: &ResourceMetadata) -> bool {
        let same = |a: &str, b: &str| a.trim().eq_ignore_ascii_case(b.trim());
        match self {
            Scope::Resource { id } => same(id, &resource.id),
            Scope::Collection {
                region,
                resource_type,
            } => {
                same(region, &resource.region)
                    && resource_type
                        .as_deref()
                        .is_none_or(|wanted| same(wanted, &resource.resource_type))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let empty = match self {
            Scope::Resource { id } => id.trim().is_empty(),
            Scope::Collection {
                region,
                resource_type,
            } => {
                region.trim().is_empty()
                    || resource_type.as_deref().is_some_and(|t| t.trim().is_empty())
            }
        };
        if empty {
            return Err(CostDrillError::InvalidQuery(format!(
                "scope has an empty identifier: {:?}",
                self
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Filter predicate on one billing dimension: `key` must equal any of `values`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFilter {
    pub key: String,
    pub values: Vec<String>,
}

impl QueryFilter {
    pub fn new(key: &str, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Tag keys and values are case-sensitive; every other dimension is not
    fn canonical(&self) -> QueryFilter {
        let trimmed = self.key.trim();
        let is_tag = trimmed
            .get(..4)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("tag:"));

        let key = if is_tag {
            format!("tag:{}", &trimmed[4..])
        } else {
            trimmed.to_lowercase()
        };

        let mut values: Vec<String> = self
            .values
            .iter()
            .map(|value| {
                let value = value.trim();
                if is_tag {
                    value.to_string()
                } else {
                    value.to_lowercase()
                }
            })
            .collect();
        values.sort();
        values.dedup();

        QueryFilter { key, values }
    }
}

impl From<&CollectionFilter> for QueryFilter {
    fn from(filter: &CollectionFilter) -> Self {
        match filter {
            CollectionFilter::State { state } => QueryFilter::new("state", &[state.as_str()]),
            CollectionFilter::ResourceType { resource_type } => {
                QueryFilter::new("type", &[resource_type.as_str()])
            }
            CollectionFilter::Tag { key, value } => QueryFilter {
                key: format!("tag:{}", key),
                values: value.iter().cloned().collect(),
            },
        }
    }
}

/// Structured description of one cost query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub scope: Scope,
    pub range: TimeRange,
    pub granularity: Granularity,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
}

impl QueryDescriptor {
    pub fn new(scope: Scope, range: TimeRange) -> Self {
        Self {
            scope,
            range,
            granularity: Granularity::Daily,
            group_by: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn group_by(mut self, dimension: &str) -> Self {
        self.group_by.push(dimension.to_string());
        self
    }

    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.scope.validate()?;
        if let Some(empty) = self.group_by.iter().find(|d| d.trim().is_empty()) {
            return Err(CostDrillError::InvalidQuery(format!(
                "empty grouping dimension {:?}",
                empty
            )));
        }
        if self.filters.iter().any(|f| f.key.trim().is_empty()) {
            return Err(CostDrillError::InvalidQuery(
                "filter with an empty dimension key".to_string(),
            ));
        }
        self.range.partition(self.granularity)?;
        Ok(())
    }

    /// Canonical form: normalized casing, sorted and de-duplicated lists
    fn canonical(&self) -> CanonicalQuery {
        let mut group_by: Vec<String> = self
            .group_by
            .iter()
            .map(|dimension| dimension.trim().to_uppercase())
            .collect();
        group_by.sort();
        group_by.dedup();

        let mut filters: Vec<QueryFilter> = self.filters.iter().map(QueryFilter::canonical).collect();
        filters.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.values.cmp(&b.values)));
        filters.dedup();

        CanonicalQuery {
            version: KEY_FORMAT_VERSION,
            scope: self.scope.canonical(),
            start: self.range.start().format("%Y-%m-%d").to_string(),
            end: self.range.end().format("%Y-%m-%d").to_string(),
            granularity: self.granularity.as_str(),
            group_by,
            filters,
        }
    }

    /// Deterministic cache key for this query
    pub fn key(&self) -> Result<QueryKey> {
        self.validate()?;
        let canonical = self.canonical();
        let encoded = serde_json::to_vec(&canonical)
            .map_err(|e| CostDrillError::InvalidQuery(format!("cannot encode query: {}", e)))?;
        let digest = Sha256::digest(&encoded);
        Ok(QueryKey(format!("{}#{:x}", canonical.scope, digest)))
    }
}

#[derive(Serialize)]
struct CanonicalQuery {
    version: u8,
    scope: String,
    start: String,
    end: String,
    granularity: &'static str,
    group_by: Vec<String>,
    filters: Vec<QueryFilter>,
}

fn normalize_identifier(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Cache key: readable scope prefix followed by a SHA-256 digest of the query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
