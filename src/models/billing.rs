use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Money;

/// Fixed cost buckets every line item is folded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Compute,
    Storage,
    DataTransfer,
    Snapshot,
    FloatingIp,
    Other,
}

impl CostCategory {
    pub const ALL: [CostCategory; 6] = [
        CostCategory::Compute,
        CostCategory::Storage,
        CostCategory::DataTransfer,
        CostCategory::Snapshot,
        CostCategory::FloatingIp,
        CostCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CostCategory::Compute => "compute",
            CostCategory::Storage => "storage",
            CostCategory::DataTransfer => "data_transfer",
            CostCategory::Snapshot => "snapshot",
            CostCategory::FloatingIp => "floating_ip",
            CostCategory::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace(['-', ' '], "_");
        CostCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .or(match normalized.as_str() {
                "elastic_ip" => Some(CostCategory::FloatingIp),
                _ => None,
            })
    }
}

impl fmt::Display for CostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single attributed charge as returned by the billing API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLineItem {
    /// Raw usage-type, service or tag label
    pub dimension_key: String,
    pub amount: Money,
    /// Usage quantity reported alongside the charge (hours, GB-hours, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_quantity: Option<Decimal>,
    /// Resource the charge belongs to, when the query grouped by resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl CostLineItem {
    pub fn new(dimension_key: &str, amount: Money) -> Self {
        Self {
            dimension_key: dimension_key.to_string(),
            amount,
            usage_quantity: None,
            resource_id: None,
        }
    }

    pub fn with_usage(mut self, quantity: Decimal) -> Self {
        self.usage_quantity = Some(quantity);
        self
    }

    pub fn for_resource(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }
}

/// Line items billed for one time bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostPeriod {
    pub date: NaiveDate,
    pub items: Vec<CostLineItem>,
    /// Total the billing API reported for the bucket, if any. Anything it holds
    /// beyond the sum of `items` is treated as unclassified spend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_total: Option<Money>,
    #[serde(default)]
    pub estimated: bool,
}

impl CostPeriod {
    pub fn new(date: NaiveDate, items: Vec<CostLineItem>) -> Self {
        Self {
            date,
            items,
            reported_total: None,
            estimated: false,
        }
    }
}
