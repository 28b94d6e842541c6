use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

use crate::error::{CostDrillError, Result};
use crate::models::{CostLineItem, CostPeriod, Money, DEFAULT_CURRENCY};

const COST_METRIC: &str = "UnblendedCost";
const USAGE_METRIC: &str = "UsageQuantity";

/// GetCostAndUsage response body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CostAndUsageResponse {
    #[serde(default)]
    pub results_by_time: Vec<ResultByTime>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultByTime {
    pub time_period: DateInterval,
    #[serde(default)]
    pub total: BTreeMap<String, MetricValue>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub estimated: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DateInterval {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Group {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricValue {
    pub amount: String,
    #[serde(default)]
    pub unit: Option<String>,
}

impl MetricValue {
    fn decimal(&self) -> Result<Decimal> {
        Decimal::from_str(self.amount.trim())
            .or_else(|_| Decimal::from_scientific(self.amount.trim()))
            .map_err(|e| {
                CostDrillError::MalformedResponse(format!("bad amount '{}': {}", self.amount, e))
            })
    }
}

/// Parse a raw GetCostAndUsage JSON document into cost periods
pub fn parse_cost_and_usage(json: &str) -> Result<Vec<CostPeriod>> {
    let response: CostAndUsageResponse = serde_json::from_str(json)
        .map_err(|e| CostDrillError::MalformedResponse(e.to_string()))?;
    response.into_periods()
}

impl CostAndUsageResponse {
    pub fn into_periods(self) -> Result<Vec<CostPeriod>> {
        let mut periods = self
            .results_by_time
            .into_iter()
            .map(ResultByTime::into_period)
            .collect::<Result<Vec<_>>>()?;
        periods.sort_by_key(|period| period.date);
        Ok(periods)
    }
}

impl ResultByTime {
    fn into_period(self) -> Result<CostPeriod> {
        let date = parse_date(&self.time_period.start)?;

        let mut items = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            if let Some(item) = group.to_line_item(date)? {
                items.push(item);
            }
        }

        let reported_total = match self.total.get(COST_METRIC) {
            Some(metric) => to_money(metric, date)?,
            None => None,
        };

        Ok(CostPeriod {
            date,
            items,
            reported_total,
            estimated: self.estimated,
        })
    }
}

impl Group {
    /// One key is the dimension; two keys are (resource id, dimension)
    fn to_line_item(&self, date: NaiveDate) -> Result<Option<CostLineItem>> {
        let (resource_id, dimension) = match self.keys.as_slice() {
            [dimension] => (None, key_value(dimension)),
            [resource_id, dimension] => (Some(key_value(resource_id)), key_value(dimension)),
            keys => {
                return Err(CostDrillError::MalformedResponse(format!(
                    "expected one or two group keys, got {:?}",
                    keys
                )));
            }
        };

        let Some(cost) = self.metrics.get(COST_METRIC) else {
            return Err(CostDrillError::MalformedResponse(format!(
                "group {:?} has no {} metric",
                self.keys, COST_METRIC
            )));
        };
        let Some(amount) = to_money(cost, date)? else {
            return Ok(None);
        };

        let mut item = CostLineItem::new(dimension, amount);
        if let Some(usage) = self.metrics.get(USAGE_METRIC) {
            item = item.with_usage(usage.decimal()?);
        }
        if let Some(resource_id) = resource_id.filter(|id| !id.is_empty()) {
            item = item.for_resource(resource_id);
        }
        Ok(Some(item))
    }
}

/// Credits and refunds come back negative; they are not charges and are skipped
fn to_money(metric: &MetricValue, date: NaiveDate) -> Result<Option<Money>> {
    let amount = metric.decimal()?;
    if amount.is_sign_negative() && !amount.is_zero() {
        warn!(%date, %amount, "skipping negative amount (credit or refund)");
        return Ok(None);
    }
    let unit = metric.unit.as_deref().unwrap_or(DEFAULT_CURRENCY);
    Money::new(amount, unit).map(Some)
}

/// `TAG$value` style keys carry the dimension name before the `$`
fn key_value(key: &str) -> &str {
    key.split_once('$').map(|(_, value)| value).unwrap_or(key)
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| CostDrillError::MalformedResponse(format!("bad date '{}': {}", value, e)))
}
