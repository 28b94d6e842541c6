use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::TimeRange;

const SECONDS_PER_HOUR: i64 = 3600;

/// Resource lifecycle states as reported by the inventory API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    /// Placeholder for resources known only from billing data
    Unknown,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Terminated => "terminated",
            LifecycleState::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "pending" => Some(LifecycleState::Pending),
            "running" => Some(LifecycleState::Running),
            "stopping" => Some(LifecycleState::Stopping),
            "stopped" => Some(LifecycleState::Stopped),
            "shutting-down" => Some(LifecycleState::ShuttingDown),
            "terminated" => Some(LifecycleState::Terminated),
            "unknown" => Some(LifecycleState::Unknown),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, LifecycleState::Running)
    }

    /// Stopped or gone; any spend in these states is a candidate for waste
    pub fn is_halted(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Terminated)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity, lifecycle and tags of one billable resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub id: String,
    pub resource_type: String,
    pub region: String,
    pub state: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ResourceMetadata {
    pub fn new(id: &str, resource_type: &str, region: &str, state: LifecycleState) -> Self {
        Self {
            id: id.to_string(),
            resource_type: resource_type.to_string(),
            region: region.to_string(),
            state,
            created_at: None,
            tags: BTreeMap::new(),
        }
    }

    /// Stand-in for a resource that has charges but no inventory record
    pub fn placeholder(id: &str, region: &str) -> Self {
        Self::new(id, "unknown", region, LifecycleState::Unknown)
    }

    pub fn created(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.state == LifecycleState::Unknown
    }

    /// Display name from the `Name` tag, falling back to the id
    pub fn name(&self) -> &str {
        self.tags.get("Name").map(String::as_str).unwrap_or(&self.id)
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Hours the resource existed inside `range`, measured up to `as_of`
    ///
    /// Terminated resources and resources without a creation time report zero.
    pub fn uptime_hours(&self, range: &TimeRange, as_of: DateTime<Utc>) -> Decimal {
        if self.state == LifecycleState::Terminated {
            return Decimal::ZERO;
        }
        let Some(created_at) = self.created_at else {
            return Decimal::ZERO;
        };

        let start = created_at.max(range.start_datetime());
        let end = as_of.min(range.end_datetime());
        if end <= start {
            return Decimal::ZERO;
        }

        let seconds = (end - start).num_seconds();
        (Decimal::from(seconds) / Decimal::from(SECONDS_PER_HOUR)).normalize()
    }
}
