use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use super::classification::ClassificationTable;
use crate::error::{CostDrillError, Result};
use crate::models::{
    CollectionSummary, CostBreakdown, CostCategory, CostLineItem, CostPeriod, DataGap, GapKind,
    Granularity, Money, ResourceMetadata, ResourceWithCost, TimeRange, TimeSeriesPoint,
};
use crate::query::Scope;

const STORAGE_USAGE_TOKEN: &str = "volumeusage";

/// Everything an aggregation needs besides the data itself
///
/// `as_of` stands in for "now" when uptime is derived from creation time, so
/// the same inputs always yield the same output.
#[derive(Debug, Clone)]
pub struct AggregationContext {
    pub range: TimeRange,
    pub granularity: Granularity,
    pub as_of: DateTime<Utc>,
    pub unit: String,
}

impl AggregationContext {
    pub fn new(range: TimeRange, granularity: Granularity, as_of: DateTime<Utc>, unit: &str) -> Self {
        Self {
            range,
            granularity,
            as_of,
            unit: unit.to_uppercase(),
        }
    }
}

/// Joins billing line items with resource metadata into breakdowns
#[derive(Debug, Clone, Default)]
pub struct CostAggregator {
    table: ClassificationTable,
}

impl CostAggregator {
    pub fn new(table: ClassificationTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ClassificationTable {
        &self.table
    }

    pub fn classify(&self, dimension_key: &str) -> CostCategory {
        self.table.classify(dimension_key)
    }

    /// Categorise a flat list of line items for one resource
    pub fn breakdown(&self, resource_id: &str, items: &[CostLineItem], unit: &str) -> Result<CostBreakdown> {
        let mut acc = Accumulator::new(unit);
        for item in items {
            acc.add_item(self, item)?;
        }
        acc.into_breakdown(resource_id)
    }

    /// Cost view of a single resource
    ///
    /// Every item in `periods` is taken to belong to `resource`. A period's
    /// reported total above the sum of its items lands in "other".
    pub fn resource_with_cost(
        &self,
        resource: ResourceMetadata,
        periods: &[CostPeriod],
        ctx: &AggregationContext,
    ) -> Result<ResourceWithCost> {
        let mut acc = Accumulator::new(&ctx.unit);
        for period in periods.iter().filter(|period| in_range(period.date, ctx)) {
            let mut items_sum = Decimal::ZERO;
            for item in &period.items {
                acc.add_item(self, item)?;
                acc.add_to_bucket(period.date, item.amount.amount(), ctx);
                items_sum += item.amount.amount();
            }
            if let Some(remainder) = remainder(period, items_sum, &ctx.unit)? {
                acc.add_other(remainder);
                acc.add_to_bucket(period.date, remainder, ctx);
            }
        }

        let gaps = if acc.item_count == 0 {
            vec![DataGap::new(&resource.id, GapKind::CostDataMissing)]
        } else {
            Vec::new()
        };
        self.finish(resource, acc, gaps, ctx)
    }

    /// Cost view of every resource in a scope
    ///
    /// Resources listed by the inventory but absent from billing get a zero
    /// breakdown; billed ids the inventory does not know get a placeholder.
    /// Both are recorded as gaps. Items without a resource id, and period
    /// totals not covered by items, are reported as unattributed cost.
    pub fn collection(
        &self,
        scope: &Scope,
        resources: Vec<ResourceMetadata>,
        periods: &[CostPeriod],
        ctx: &AggregationContext,
    ) -> Result<CollectionSummary> {
        let mut by_resource: BTreeMap<String, Vec<(NaiveDate, &CostLineItem)>> = BTreeMap::new();
        let mut unattributed = Decimal::ZERO;

        for period in periods.iter().filter(|period| in_range(period.date, ctx)) {
            let mut items_sum = Decimal::ZERO;
            for item in &period.items {
                ensure_unit(&item.amount, &ctx.unit)?;
                items_sum += item.amount.amount();
                match item.resource_id.as_deref() {
                    Some(id) => by_resource
                        .entry(id.trim().to_lowercase())
                        .or_default()
                        .push((period.date, item)),
                    None => unattributed += item.amount.amount(),
                }
            }
            if let Some(extra) = remainder(period, items_sum, &ctx.unit)? {
                unattributed += extra;
            }
        }

        let mut views = Vec::with_capacity(resources.len());
        let mut gaps = Vec::new();

        // The inventory's order is kept; placeholders follow, sorted by id
        let mut known: HashSet<String> = HashSet::new();
        for resource in resources {
            let normalized = resource.id.trim().to_lowercase();
            known.insert(normalized.clone());
            let items = by_resource.get(&normalized).map(Vec::as_slice).unwrap_or(&[]);

            let resource_gaps = if items.is_empty() {
                debug!(resource_id = %resource.id, "no billing data for inventoried resource");
                vec![DataGap::new(&resource.id, GapKind::CostDataMissing)]
            } else {
                Vec::new()
            };
            gaps.extend(resource_gaps.iter().cloned());
            views.push(self.join(resource, items, resource_gaps, ctx)?);
        }

        let region = match scope {
            Scope::Collection { region, .. } => region.as_str(),
            Scope::Resource { .. } => "",
        };
        for (normalized, items) in &by_resource {
            if known.contains(normalized) {
                continue;
            }
            let Some((_, first)) = items.first() else {
                continue;
            };
            let id = first.resource_id.as_deref().unwrap_or(normalized.as_str()).trim();
            warn!(resource_id = id, "billed resource missing from inventory");
            let resource_gaps = vec![DataGap::new(id, GapKind::MetadataMissing)];
            gaps.extend(resource_gaps.iter().cloned());
            views.push(self.join(ResourceMetadata::placeholder(id, region), items, resource_gaps, ctx)?);
        }

        CollectionSummary::new(
            &scope.canonical(),
            ctx.range,
            views,
            gaps,
            Money::new(unattributed, &ctx.unit)?,
        )
    }

    fn join(
        &self,
        resource: ResourceMetadata,
        items: &[(NaiveDate, &CostLineItem)],
        gaps: Vec<DataGap>,
        ctx: &AggregationContext,
    ) -> Result<ResourceWithCost> {
        let mut acc = Accumulator::new(&ctx.unit);
        for (date, item) in items {
            acc.add_item(self, item)?;
            acc.add_to_bucket(*date, item.amount.amount(), ctx);
        }
        self.finish(resource, acc, gaps, ctx)
    }

    fn finish(
        &self,
        resource: ResourceMetadata,
        acc: Accumulator,
        gaps: Vec<DataGap>,
        ctx: &AggregationContext,
    ) -> Result<ResourceWithCost> {
        let time_series = acc.time_series(ctx)?;
        let fallback_hours = resource.uptime_hours(&ctx.range, ctx.as_of);
        let mut breakdown = acc.into_breakdown(&resource.id)?;
        if breakdown.running_hours.is_zero() {
            breakdown.running_hours = fallback_hours;
        }

        Ok(ResourceWithCost {
            resource,
            breakdown,
            range: ctx.range,
            time_series,
            gaps,
        })
    }
}

/// Running sums for one resource, kept as plain decimals until the end
struct Accumulator {
    unit: String,
    categories: BTreeMap<CostCategory, Decimal>,
    dimensions: BTreeMap<String, Decimal>,
    buckets: BTreeMap<NaiveDate, Decimal>,
    running_hours: Decimal,
    storage_gb_hours: Decimal,
    item_count: usize,
}

impl Accumulator {
    fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_uppercase(),
            categories: BTreeMap::new(),
            dimensions: BTreeMap::new(),
            buckets: BTreeMap::new(),
            running_hours: Decimal::ZERO,
            storage_gb_hours: Decimal::ZERO,
            item_count: 0,
        }
    }

    fn add_item(&mut self, aggregator: &CostAggregator, item: &CostLineItem) -> Result<()> {
        ensure_unit(&item.amount, &self.unit)?;
        let amount = item.amount.amount();
        let category = aggregator.classify(&item.dimension_key);
        if category == CostCategory::Other {
            debug!(dimension_key = %item.dimension_key, "uncategorized usage type");
        }

        *self.categories.entry(category).or_default() += amount;
        *self
            .dimensions
            .entry(item.dimension_key.clone())
            .or_default() += amount;

        if let Some(quantity) = item.usage_quantity {
            if category == CostCategory::Compute {
                self.running_hours += quantity;
            }
            if item.dimension_key.to_lowercase().contains(STORAGE_USAGE_TOKEN) {
                self.storage_gb_hours += quantity;
            }
        }
        self.item_count += 1;
        Ok(())
    }

    fn add_other(&mut self, amount: Decimal) {
        *self.categories.entry(CostCategory::Other).or_default() += amount;
    }

    fn add_to_bucket(&mut self, date: NaiveDate, amount: Decimal, ctx: &AggregationContext) {
        let bucket = TimeRange::bucket_of(date, ctx.granularity);
        *self.buckets.entry(bucket).or_default() += amount;
    }

    /// One point per bucket of the range, zero where nothing was billed
    fn time_series(&self, ctx: &AggregationContext) -> Result<Vec<TimeSeriesPoint>> {
        ctx.range
            .partition(ctx.granularity)?
            .into_iter()
            .map(|date| {
                let amount = self.buckets.get(&date).copied().unwrap_or_default();
                Ok(TimeSeriesPoint {
                    date,
                    cost: Money::new(amount, &self.unit)?,
                })
            })
            .collect()
    }

    fn into_breakdown(self, resource_id: &str) -> Result<CostBreakdown> {
        let money = |category: CostCategory| -> Result<Money> {
            Money::new(
                self.categories.get(&category).copied().unwrap_or_default(),
                &self.unit,
            )
        };
        let total: Decimal = self.categories.values().copied().sum();

        let dimension_costs = self
            .dimensions
            .iter()
            .map(|(key, amount)| Ok((key.clone(), Money::new(*amount, &self.unit)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(CostBreakdown {
            resource_id: resource_id.to_string(),
            total_cost: Money::new(total, &self.unit)?,
            compute_cost: money(CostCategory::Compute)?,
            storage_cost: money(CostCategory::Storage)?,
            data_transfer_cost: money(CostCategory::DataTransfer)?,
            snapshot_cost: money(CostCategory::Snapshot)?,
            floating_ip_cost: money(CostCategory::FloatingIp)?,
            other_cost: money(CostCategory::Other)?,
            dimension_costs,
            running_hours: self.running_hours.normalize(),
            storage_gb_hours: self.storage_gb_hours.normalize(),
        })
    }
}

fn in_range(date: NaiveDate, ctx: &AggregationContext) -> bool {
    let inside = ctx.range.contains(date);
    if !inside {
        debug!(%date, range = %ctx.range, "ignoring billing period outside the query range");
    }
    inside
}

fn ensure_unit(amount: &Money, unit: &str) -> Result<()> {
    if !amount.unit().eq_ignore_ascii_case(unit) {
        return Err(CostDrillError::CurrencyMismatch {
            left: amount.unit().to_string(),
            right: unit.to_uppercase(),
        });
    }
    Ok(())
}

/// Part of a period's reported total not covered by its line items
fn remainder(period: &CostPeriod, items_sum: Decimal, unit: &str) -> Result<Option<Decimal>> {
    let Some(reported) = &period.reported_total else {
        return Ok(None);
    };
    ensure_unit(reported, unit)?;
    let extra = reported.amount() - items_sum;
    Ok((extra > Decimal::ZERO).then_some(extra))
}
