use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::error::{CostDrillError, Result};
use crate::models::{
    CostBreakdown, LifecycleState, Money, ResourceMetadata, TimeRange, TimeSeriesPoint,
};

/// Days used to turn a daily rate into a monthly projection
pub const PROJECTION_DAYS: Decimal = Decimal::from_parts(30, 0, 0, false, 0);

/// Why a resource's cost picture is incomplete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GapKind {
    /// Charges exist but the inventory has no record of the resource
    MetadataMissing,
    /// The inventory lists the resource but billing returned nothing for it
    CostDataMissing,
    /// Billing had no data for one bucket; it counts as zero cost
    NoDataForDate { date: NaiveDate },
    /// The resource could not be looked up at all and was omitted
    LookupFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataGap {
    pub resource_id: String,
    #[serde(flatten)]
    pub kind: GapKind,
}

impl DataGap {
    pub fn new(resource_id: &str, kind: GapKind) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            kind,
        }
    }

    pub fn to_error(&self) -> CostDrillError {
        let detail = match &self.kind {
            GapKind::MetadataMissing => "charges present without resource metadata".to_string(),
            GapKind::CostDataMissing => "resource metadata present without charges".to_string(),
            GapKind::NoDataForDate { date } => format!("no billing data for {}", date),
            GapKind::LookupFailed { reason } => format!("lookup failed: {}", reason),
        };
        CostDrillError::IncompleteCostData {
            resource_id: self.resource_id.clone(),
            detail,
        }
    }
}

/// One resource joined with its cost for a query range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceWithCost {
    pub resource: ResourceMetadata,
    pub breakdown: CostBreakdown,
    pub range: TimeRange,
    #[serde(default)]
    pub time_series: Vec<TimeSeriesPoint>,
    #[serde(default)]
    pub gaps: Vec<DataGap>,
}

impl ResourceWithCost {
    pub fn resource_id(&self) -> &str {
        &self.resource.id
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub fn total_cost(&self) -> &Money {
        &self.breakdown.total_cost
    }

    /// Average cost per day of the query range
    pub fn daily_cost(&self) -> Money {
        self.total_cost().per(Decimal::from(self.range.days()))
    }

    /// Daily cost extrapolated to a 30 day month
    pub fn monthly_projection(&self) -> Money {
        self.daily_cost().times(PROJECTION_DAYS)
    }

    pub fn is_partial(&self) -> bool {
        !self.gaps.is_empty()
    }
}

/// Selector narrowing a collection view
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum CollectionFilter {
    State { state: LifecycleState },
    ResourceType { resource_type: String },
    Tag { key: String, value: Option<String> },
}

impl CollectionFilter {
    /// Parse `state=running`, `type=t3.large`, `tag:env=prod` or `tag:env`
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            CostDrillError::InvalidQuery(format!("filter '{}': {}", expression, reason))
        };

        if let Some(tag) = expression.strip_prefix("tag:") {
            let (key, value) = match tag.split_once('=') {
                Some((key, value)) => (key, Some(value.to_string())),
                None => (tag, None),
            };
            if key.is_empty() {
                return Err(invalid("tag key is empty"));
            }
            return Ok(CollectionFilter::Tag {
                key: key.to_string(),
                value,
            });
        }

        match expression.split_once('=') {
            Some(("state", value)) => LifecycleState::parse(value)
                .map(|state| CollectionFilter::State { state })
                .ok_or_else(|| invalid("unknown lifecycle state")),
            Some(("type", value)) if !value.is_empty() => Ok(CollectionFilter::ResourceType {
                resource_type: value.to_string(),
            }),
            _ => Err(invalid("expected state=, type= or tag:")),
        }
    }

    pub fn matches(&self, resource: &ResourceMetadata) -> bool {
        match self {
            CollectionFilter::State { state } => resource.state == *state,
            CollectionFilter::ResourceType { resource_type } => {
                resource.resource_type.eq_ignore_ascii_case(resource_type)
            }
            CollectionFilter::Tag { key, value } => match (resource.get_tag(key), value) {
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => actual == expected,
                (None, _) => false,
            },
        }
    }
}

/// Read-only view over the resources of one scope
///
/// Every filtering operation returns a new summary; the aggregate total is
/// computed on first use and memoised.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionSummary {
    pub scope: String,
    pub range: TimeRange,
    resources: Vec<ResourceWithCost>,
    gaps: Vec<DataGap>,
    unattributed_cost: Money,
    #[serde(skip)]
    total: OnceLock<Money>,
}

impl CollectionSummary {
    pub fn new(
        scope: &str,
        range: TimeRange,
        resources: Vec<ResourceWithCost>,
        gaps: Vec<DataGap>,
        unattributed_cost: Money,
    ) -> Result<Self> {
        for resource in &resources {
            resource.total_cost().ensure_same_unit(&unattributed_cost)?;
        }
        Ok(Self {
            scope: scope.to_string(),
            range,
            resources,
            gaps,
            unattributed_cost,
            total: OnceLock::new(),
        })
    }

    /// Same summary with scope-level gaps appended
    pub fn with_gaps<I>(mut self, gaps: I) -> Self
    where
        I: IntoIterator<Item = DataGap>,
    {
        self.gaps.extend(gaps);
        self
    }

    pub fn unit(&self) -> &str {
        self.unattributed_cost.unit()
    }

    pub fn resources(&self) -> &[ResourceWithCost] {
        &self.resources
    }

    pub fn gaps(&self) -> &[DataGap] {
        &self.gaps
    }

    /// Charges that could not be attributed to any resource
    pub fn unattributed_cost(&self) -> &Money {
        &self.unattributed_cost
    }

    pub fn get(&self, resource_id: &str) -> Option<&ResourceWithCost> {
        self.resources
            .iter()
            .find(|resource| resource.resource_id() == resource_id)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Sum of every resource's total cost
    pub fn total_cost(&self) -> &Money {
        self.total.get_or_init(|| {
            let amount: Decimal = self
                .resources
                .iter()
                .map(|resource| resource.total_cost().amount())
                .sum();
            Money::new(amount, self.unit()).unwrap_or_else(|_| Money::zero(self.unit()))
        })
    }

    pub fn average_cost_per_resource(&self) -> Money {
        self.total_cost().per(Decimal::from(self.resources.len()))
    }

    pub fn is_partial(&self) -> bool {
        !self.gaps.is_empty()
    }

    /// Ids of resources whose data is incomplete or missing, sorted
    pub fn failed_resources(&self) -> Vec<String> {
        self.gaps
            .iter()
            .map(|gap| gap.resource_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn state_counts(&self) -> BTreeMap<LifecycleState, usize> {
        let mut counts = BTreeMap::new();
        for resource in &self.resources {
            *counts.entry(resource.resource.state).or_insert(0) += 1;
        }
        counts
    }

    pub fn running_count(&self) -> usize {
        self.count_in_state(LifecycleState::Running)
    }

    pub fn stopped_count(&self) -> usize {
        self.count_in_state(LifecycleState::Stopped)
    }

    fn count_in_state(&self, state: LifecycleState) -> usize {
        self.resources
            .iter()
            .filter(|resource| resource.resource.state == state)
            .count()
    }

    pub fn by_type(&self) -> BTreeMap<String, Vec<&ResourceWithCost>> {
        self.group_by(|resource| Some(resource.resource.resource_type.clone()))
    }

    pub fn by_state(&self) -> BTreeMap<LifecycleState, Vec<&ResourceWithCost>> {
        self.group_by(|resource| Some(resource.resource.state))
    }

    /// Group by the value of tag `key`; untagged resources are left out
    pub fn by_tag(&self, key: &str) -> BTreeMap<String, Vec<&ResourceWithCost>> {
        self.group_by(|resource| resource.resource.get_tag(key).map(str::to_string))
    }

    fn group_by<K, F>(&self, selector: F) -> BTreeMap<K, Vec<&ResourceWithCost>>
    where
        K: Ord,
        F: Fn(&ResourceWithCost) -> Option<K>,
    {
        let mut groups: BTreeMap<K, Vec<&ResourceWithCost>> = BTreeMap::new();
        for resource in &self.resources {
            if let Some(key) = selector(resource) {
                groups.entry(key).or_default().push(resource);
            }
        }
        groups
    }

    /// The `limit` most expensive resources, ties broken by id ascending
    pub fn top_n(&self, limit: usize) -> Vec<&ResourceWithCost> {
        let mut ranked: Vec<&ResourceWithCost> = self.resources.iter().collect();
        ranked.sort_by(|a, b| {
            b.total_cost()
                .amount()
                .cmp(&a.total_cost().amount())
                .then_with(|| a.resource_id().cmp(b.resource_id()))
        });
        ranked.truncate(limit);
        ranked
    }

    /// New summary holding only the resources `predicate` accepts
    ///
    /// Gaps of dropped resources go with them. Gaps recorded against the
    /// scope itself (failed lookups, missing billing days) always stay.
    pub fn filter<F>(&self, predicate: F) -> CollectionSummary
    where
        F: Fn(&ResourceWithCost) -> bool,
    {
        let resources: Vec<ResourceWithCost> = self
            .resources
            .iter()
            .filter(|resource| predicate(resource))
            .cloned()
            .collect();
        let kept: BTreeSet<&str> = resources.iter().map(|r| r.resource_id()).collect();
        let dropped: BTreeSet<&str> = self
            .resources
            .iter()
            .map(|r| r.resource_id())
            .filter(|id| !kept.contains(id))
            .collect();
        let gaps = self
            .gaps
            .iter()
            .filter(|gap| !dropped.contains(gap.resource_id.as_str()))
            .cloned()
            .collect();

        CollectionSummary {
            scope: self.scope.clone(),
            range: self.range,
            resources,
            gaps,
            unattributed_cost: self.unattributed_cost.clone(),
            total: OnceLock::new(),
        }
    }

    /// Resources carrying tag `key`, optionally with exactly `value`
    pub fn with_tag(&self, key: &str, value: Option<&str>) -> CollectionSummary {
        let filter = CollectionFilter::Tag {
            key: key.to_string(),
            value: value.map(str::to_string),
        };
        self.filter(|resource| filter.matches(&resource.resource))
    }

    /// Keep resources matching every filter
    pub fn apply_filters(&self, filters: &[CollectionFilter]) -> CollectionSummary {
        self.filter(|resource| filters.iter().all(|f| f.matches(&resource.resource)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CostBreakdown;
    use rust_decimal_macros::dec;

    fn range() -> TimeRange {
        TimeRange::parse("2024-03-01", "2024-03-31").unwrap()
    }

    fn resource(id: &str, kind: &str, state: LifecycleState, cost: Decimal) -> ResourceWithCost {
        let mut breakdown = CostBreakdown::empty(id, "USD");
        breakdown.total_cost = Money::usd(cost).unwrap();
        breakdown.compute_cost = Money::usd(cost).unwrap();
        ResourceWithCost {
            resource: ResourceMetadata::new(id, kind, "us-east-1", state),
            breakdown,
            range: range(),
            time_series: Vec::new(),
            gaps: Vec::new(),
        }
    }

    fn summary(resources: Vec<ResourceWithCost>) -> CollectionSummary {
        CollectionSummary::new("region:us-east-1", range(), resources, Vec::new(), Money::zero("USD"))
            .unwrap()
    }

    #[test]
    fn test_daily_cost_and_projection() {
        let item = resource("i-test", "t3.large", LifecycleState::Running, dec!(150));
        assert_eq!(item.daily_cost().amount(), dec!(5));
        assert_eq!(item.monthly_projection().amount(), dec!(150));
    }

    #[test]
    fn test_counts_and_average() {
        let summary = summary(vec![
            resource("i-0", "t3.large", LifecycleState::Running, dec!(50)),
            resource("i-1", "t3.large", LifecycleState::Running, dec!(40)),
            resource("i-2", "m5.large", LifecycleState::Running, dec!(30)),
            resource("i-3", "m5.large", LifecycleState::Stopped, dec!(20)),
            resource("i-4", "t3.micro", LifecycleState::Stopped, dec!(10)),
        ]);

        assert_eq!(summary.resource_count(), 5);
        assert_eq!(summary.running_count(), 3);
        assert_eq!(summary.stopped_count(), 2);
        assert_eq!(summary.total_cost().amount(), dec!(150));
        assert_eq!(summary.average_cost_per_resource().amount(), dec!(30));
        assert_eq!(summary.state_counts().get(&LifecycleState::Stopped), Some(&2));
        assert_eq!(summary.by_type().get("m5.large").map(Vec::len), Some(2));
        assert_eq!(
            summary.by_state().get(&LifecycleState::Running).map(Vec::len),
            Some(3)
        );
    }

    #[test]
    fn test_top_n_ties_broken_by_id() {
        let summary = summary(vec![
            resource("i-c", "t3.large", LifecycleState::Running, dec!(10)),
            resource("i-a", "t3.large", LifecycleState::Running, dec!(10)),
            resource("i-b", "t3.large", LifecycleState::Running, dec!(25)),
        ]);

        let ids: Vec<&str> = summary.top_n(2).iter().map(|r| r.resource_id()).collect();
        assert_eq!(ids, vec!["i-b", "i-a"]);

        let all: Vec<&str> = summary.top_n(10).iter().map(|r| r.resource_id()).collect();
        assert_eq!(all, vec!["i-b", "i-a", "i-c"]);
    }

    #[test]
    fn test_by_tag_excludes_untagged() {
        let mut prod = resource("i-1", "t3.large", LifecycleState::Running, dec!(1));
        prod.resource = prod.resource.tag("Environment", "prod");
        let mut dev = resource("i-2", "t3.large", LifecycleState::Running, dec!(1));
        dev.resource = dev.resource.tag("Environment", "dev");
        let untagged = resource("i-3", "t3.large", LifecycleState::Running, dec!(1));

        let summary = summary(vec![prod, dev, untagged]);
        let groups = summary.by_tag("Environment");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["prod"].len(), 1);
        assert_eq!(groups["dev"].len(), 1);

        assert_eq!(summary.with_tag("Environment", None).resource_count(), 2);
        assert_eq!(summary.with_tag("Environment", Some("prod")).resource_count(), 1);
    }

    #[test]
    fn test_filter_returns_new_summary() {
        let original = summary(vec![
            resource("i-1", "t3.large", LifecycleState::Running, dec!(7)),
            resource("i-2", "t3.large", LifecycleState::Stopped, dec!(3)),
        ]);
        assert_eq!(original.total_cost().amount(), dec!(10));

        let running = original.apply_filters(&[CollectionFilter::State {
            state: LifecycleState::Running,
        }]);
        assert_eq!(running.resource_count(), 1);
        assert_eq!(running.total_cost().amount(), dec!(7));
        assert_eq!(original.resource_count(), 2);
        assert_eq!(original.total_cost().amount(), dec!(10));
    }

    #[test]
    fn test_partial_flag_and_failed_ids() {
        let summary = CollectionSummary::new(
            "region:us-east-1",
            range(),
            vec![resource("i-1", "t3.large", LifecycleState::Running, dec!(1))],
            vec![
                DataGap::new("i-9", GapKind::MetadataMissing),
                DataGap::new("i-1", GapKind::CostDataMissing),
                DataGap::new("i-9", GapKind::CostDataMissing),
            ],
            Money::zero("USD"),
        )
        .unwrap();

        assert!(summary.is_partial());
        assert_eq!(summary.failed_resources(), vec!["i-1", "i-9"]);
    }

    #[test]
    fn test_filtering_keeps_scope_level_gaps() {
        let summary = CollectionSummary::new(
            "region:us-east-1",
            range(),
            vec![
                resource("i-1", "t3.large", LifecycleState::Running, dec!(5)),
                resource("i-2", "t3.large", LifecycleState::Stopped, dec!(2)),
            ],
            vec![
                DataGap::new("i-2", GapKind::CostDataMissing),
                DataGap::new(
                    "region:us-east-1",
                    GapKind::LookupFailed {
                        reason: "inventory unavailable".to_string(),
                    },
                ),
            ],
            Money::zero("USD"),
        )
        .unwrap();

        let everything = summary.filter(|_| true);
        assert!(everything.is_partial());
        assert_eq!(everything.gaps().len(), 2);

        let running = summary.apply_filters(&[CollectionFilter::State {
            state: LifecycleState::Running,
        }]);
        assert!(running.is_partial());
        assert_eq!(running.failed_resources(), vec!["region:us-east-1"]);

        let tagged = summary.with_tag("team", None);
        assert_eq!(tagged.resource_count(), 0);
        assert!(tagged.is_partial());
    }

    #[test]
    fn test_gap_as_error() {
        let gap = DataGap::new("i-9", GapKind::MetadataMissing);
        let error = gap.to_error();
        assert!(matches!(
            &error,
            CostDrillError::IncompleteCostData { resource_id, .. } if resource_id == "i-9"
        ));
        assert!(error.to_string().contains("i-9"));
    }

    #[test]
    fn test_mixed_currency_rejected() {
        let result = CollectionSummary::new(
            "region:eu-west-1",
            range(),
            vec![resource("i-1", "t3.large", LifecycleState::Running, dec!(1))],
            Vec::new(),
            Money::zero("EUR"),
        );
        assert!(matches!(result, Err(CostDrillError::CurrencyMismatch { .. })));
    }

    #[test]
    fn test_filter_parse() {
        assert_eq!(
            CollectionFilter::parse("state=stopped").unwrap(),
            CollectionFilter::State {
                state: LifecycleState::Stopped
            }
        );
        assert_eq!(
            CollectionFilter::parse("tag:team=ml").unwrap(),
            CollectionFilter::Tag {
                key: "team".to_string(),
                value: Some("ml".to_string())
            }
        );
        assert_eq!(
            CollectionFilter::parse("tag:team").unwrap(),
            CollectionFilter::Tag {
                key: "team".to_string(),
                value: None
            }
        );
        assert!(CollectionFilter::parse("state=melting").is_err());
        assert!(CollectionFilter::parse("color=blue").is_err());
        assert!(CollectionFilter::parse("tag:=x").is_err());
    }
}
