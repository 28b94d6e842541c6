//! Cached-query facade
//!
//! `CostDrill` is the only entry point the presentation layer needs. It builds
//! the cache key, consults the cache, and on a miss runs one shared fetch per
//! key through the billing and inventory collaborators before aggregating.
//! Everything that shapes results (TTLs, currency, classification table) is
//! passed in at construction.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analysis::{
    AggregationContext, ClassificationTable, CostAggregator, WasteAnalyzer, WasteIndicator,
    WasteReport, DEFAULT_HIGH_TRANSFER_FRACTION,
};
use crate::cache::{CacheStats, Clock, SingleFlight, SystemClock, TtlCache};
use crate::error::{CostDrillError, Result};
use crate::fetch::{BillingQuery, BillingSource, InventorySource};
use crate::models::{
    CollectionFilter, CollectionSummary, CostComparison, CostPeriod, DataGap, GapKind,
    Granularity, Money, ResourceMetadata, ResourceWithCost, TimeRange, DEFAULT_CURRENCY,
};
use crate::query::{QueryFilter, QueryKey, Scope};

const USAGE_TYPE_DIMENSION: &str = "USAGE_TYPE";
const RESOURCE_DIMENSION: &str = "RESOURCE_ID";

/// Construction-time knobs for [`CostDrill`]
#[derive(Debug, Clone, PartialEq)]
pub struct FacadeSettings {
    /// When false every call goes straight to the collaborators
    pub cache_enabled: bool,
    pub breakdown_ttl: Duration,
    pub collection_ttl: Duration,
    pub granularity: Granularity,
    pub currency: String,
    pub high_transfer_fraction: Decimal,
}

impl Default for FacadeSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            breakdown_ttl: Duration::seconds(3600),
            collection_ttl: Duration::seconds(1800),
            granularity: Granularity::Daily,
            currency: DEFAULT_CURRENCY.to_string(),
            high_transfer_fraction: DEFAULT_HIGH_TRANSFER_FRACTION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FacadeStats {
    pub breakdowns: CacheStats,
    pub collections: CacheStats,
}

/// Shared pieces a fetch task needs once it is detached from the caller
struct Loader<B, I> {
    billing: Arc<B>,
    inventory: Arc<I>,
    aggregator: Arc<CostAggregator>,
    clock: Arc<dyn Clock>,
    granularity: Granularity,
    currency: String,
}

impl<B, I> Clone for Loader<B, I> {
    fn clone(&self) -> Self {
        Self {
            billing: self.billing.clone(),
            inventory: self.inventory.clone(),
            aggregator: self.aggregator.clone(),
            clock: self.clock.clone(),
            granularity: self.granularity,
            currency: self.currency.clone(),
        }
    }
}

pub struct CostDrill<B, I> {
    loader: Loader<B, I>,
    waste: WasteAnalyzer,
    settings: FacadeSettings,
    breakdowns: Arc<TtlCache<ResourceWithCost>>,
    collections: Arc<TtlCache<CollectionSummary>>,
    breakdown_flights: SingleFlight<ResourceWithCost>,
    collection_flights: SingleFlight<CollectionSummary>,
}

impl<B, I> CostDrill<B, I>
where
    B: BillingSource,
    I: InventorySource,
{
    pub fn new(billing: B, inventory: I, table: ClassificationTable, settings: FacadeSettings) -> Self {
        Self::with_clock(billing, inventory, table, settings, Arc::new(SystemClock))
    }

    /// Like [`CostDrill::new`] with an explicit time source for expiry and uptime
    pub fn with_clock(
        billing: B,
        inventory: I,
        table: ClassificationTable,
        settings: FacadeSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let loader = Loader {
            billing: Arc::new(billing),
            inventory: Arc::new(inventory),
            aggregator: Arc::new(CostAggregator::new(table)),
            clock: clock.clone(),
            granularity: settings.granularity,
            currency: settings.currency.to_uppercase(),
        };

        Self {
            loader,
            waste: WasteAnalyzer::new(settings.high_transfer_fraction),
            breakdowns: Arc::new(TtlCache::with_clock(settings.breakdown_ttl, clock.clone())),
            collections: Arc::new(TtlCache::with_clock(settings.collection_ttl, clock)),
            breakdown_flights: SingleFlight::new(),
            collection_flights: SingleFlight::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &FacadeSettings {
        &self.settings
    }

    pub fn aggregator(&self) -> &CostAggregator {
        &self.loader.aggregator
    }

    fn breakdown_query(&self, resource_id: &str, range: TimeRange) -> BillingQuery {
        BillingQuery::new(Scope::resource(resource_id), range)
            .with_granularity(self.settings.granularity)
            .group_by(USAGE_TYPE_DIMENSION)
    }

    fn collection_query(&self, scope: &Scope, range: TimeRange, filters: &[CollectionFilter]) -> BillingQuery {
        filters.iter().fold(
            BillingQuery::new(scope.clone(), range)
                .with_granularity(self.settings.granularity)
                .group_by(RESOURCE_DIMENSION)
                .group_by(USAGE_TYPE_DIMENSION),
            |query, filter| query.filter(QueryFilter::from(filter)),
        )
    }

    /// Cost of one resource over `range`
    pub async fn get_breakdown(&self, resource_id: &str, range: TimeRange) -> Result<ResourceWithCost> {
        let query = self.breakdown_query(resource_id, range);
        let key = query.key()?;

        if !self.settings.cache_enabled {
            return self.loader.load_breakdown(&query).await;
        }

        let cache = self.breakdowns.clone();
        let ttl = self.settings.breakdown_ttl;
        let loader = self.loader.clone();
        let task_key = key.clone();

        self.breakdown_flights
            .get_or_fetch(
                key.as_str(),
                || self.breakdowns.get(key.as_str()),
                move || async move {
                    let view = loader.load_breakdown(&query).await?;
                    cache.put(task_key.as_str(), view.clone(), ttl);
                    Ok(view)
                },
            )
            .await
    }

    /// Cost of every resource in a region scope, narrowed by `filters`
    pub async fn get_collection(
        &self,
        scope: &Scope,
        range: TimeRange,
        filters: &[CollectionFilter],
    ) -> Result<CollectionSummary> {
        if let Scope::Resource { id } = scope {
            return Err(CostDrillError::InvalidQuery(format!(
                "collection queries need a region scope, got resource '{}'",
                id
            )));
        }
        let query = self.collection_query(scope, range, filters);
        let key = query.key()?;
        let filters = filters.to_vec();

        if !self.settings.cache_enabled {
            return self.loader.load_collection(&query, &filters).await;
        }

        let cache = self.collections.clone();
        let ttl = self.settings.collection_ttl;
        let loader = self.loader.clone();
        let task_key = key.clone();

        self.collection_flights
            .get_or_fetch(
                key.as_str(),
                || self.collections.get(key.as_str()),
                move || async move {
                    let summary = loader.load_collection(&query, &filters).await?;
                    cache.put(task_key.as_str(), summary.clone(), ttl);
                    Ok(summary)
                },
            )
            .await
    }

    /// Waste findings for one resource
    pub async fn waste_for(&self, resource_id: &str, range: TimeRange) -> Result<WasteIndicator> {
        let view = self.get_breakdown(resource_id, range).await?;
        Ok(self.waste.analyze_resource(&view))
    }

    /// Waste findings across a collection, most expensive first
    pub async fn waste_report(
        &self,
        scope: &Scope,
        range: TimeRange,
        filters: &[CollectionFilter],
    ) -> Result<WasteReport> {
        let summary = self.get_collection(scope, range, filters).await?;
        self.waste.report(&summary)
    }

    /// Change in one resource's cost between two ranges
    pub async fn compare(
        &self,
        resource_id: &str,
        current: TimeRange,
        baseline: TimeRange,
    ) -> Result<CostComparison> {
        let (current, baseline) = tokio::try_join!(
            self.get_breakdown(resource_id, current),
            self.get_breakdown(resource_id, baseline)
        )?;
        CostComparison::compare(&current.breakdown, &baseline.breakdown)
    }

    /// Drop every cached view of one resource
    ///
    /// Removes its breakdowns whatever their query shape, and every cached
    /// collection that lists it. Collections that filtered it out are kept.
    pub fn invalidate(&self, resource_id: &str) -> usize {
        let breakdowns = self
            .breakdowns
            .invalidate_prefix(&Scope::resource(resource_id).key_prefix());
        let wanted = normalize_id(resource_id);
        let collections = self.collections.invalidate_where(|_, summary| {
            summary
                .resources()
                .iter()
                .any(|resource| normalize_id(resource.resource_id()) == wanted)
        });
        info!(resource_id, breakdowns, collections, "invalidated cached views");
        breakdowns + collections
    }

    /// Drop every cached collection view for `scope`
    pub fn invalidate_scope(&self, scope: &Scope) -> usize {
        let prefix = scope.key_prefix();
        self.breakdowns.invalidate_prefix(&prefix) + self.collections.invalidate_prefix(&prefix)
    }

    pub fn sweep_expired(&self) -> usize {
        self.breakdowns.sweep_expired() + self.collections.sweep_expired()
    }

    pub fn clear(&self) {
        self.breakdowns.clear();
        self.collections.clear();
    }

    pub fn stats(&self) -> FacadeStats {
        FacadeStats {
            breakdowns: self.breakdowns.stats(),
            collections: self.collections.stats(),
        }
    }

    /// Cache key a breakdown request maps to
    pub fn breakdown_key(&self, resource_id: &str, range: TimeRange) -> Result<QueryKey> {
        self.breakdown_query(resource_id, range).key()
    }
}

impl<B, I> Loader<B, I>
where
    B: BillingSource,
    I: InventorySource,
{
    fn context(&self, range: TimeRange) -> AggregationContext {
        AggregationContext::new(range, self.granularity, self.clock.now(), &self.currency)
    }

    async fn load_breakdown(&self, query: &BillingQuery) -> Result<ResourceWithCost> {
        let Scope::Resource { id } = &query.scope else {
            return Err(CostDrillError::InvalidQuery(
                "breakdown queries need a resource scope".to_string(),
            ));
        };
        debug!(resource_id = %id, range = %query.range, "fetching resource cost");

        let (listed, billed) = tokio::join!(
            self.inventory.list_resources(&query.scope),
            self.billing.fetch_costs(query)
        );
        let (periods, mut gaps) = tolerate_missing_data(billed, id)?;

        let metadata = match listed {
            Ok(resources) => resources.into_iter().next(),
            Err(CostDrillError::ResourceNotFound { .. }) => None,
            Err(e) => return Err(e),
        };

        let resource = match metadata {
            Some(resource) => resource,
            None if periods.iter().all(|period| period.items.is_empty()) => {
                return Err(CostDrillError::resource_not_found("resource", id));
            }
            None => {
                warn!(resource_id = %id, "charges found for a resource the inventory does not list");
                gaps.push(DataGap::new(id, GapKind::MetadataMissing));
                ResourceMetadata::placeholder(id, "")
            }
        };

        let mut view = self
            .aggregator
            .resource_with_cost(resource, &periods, &self.context(query.range))?;
        view.gaps.extend(gaps);
        Ok(view)
    }

    async fn load_collection(
        &self,
        query: &BillingQuery,
        filters: &[CollectionFilter],
    ) -> Result<CollectionSummary> {
        let scope_label = query.scope.canonical();
        debug!(scope = %scope_label, range = %query.range, "fetching collection cost");

        let (listed, billed) = tokio::join!(
            self.inventory.list_resources(&query.scope),
            self.billing.fetch_costs(query)
        );
        let (periods, mut gaps) = tolerate_missing_data(billed, &scope_label)?;

        let mut resources = match listed {
            Ok(resources) => resources,
            Err(e) if e.is_fatal() || e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(scope = %scope_label, error = %e, "inventory lookup failed, continuing with billing data only");
                gaps.push(DataGap::new(
                    &scope_label,
                    GapKind::LookupFailed {
                        reason: e.to_string(),
                    },
                ));
                Vec::new()
            }
        };

        let periods = self
            .narrow_to_scope(&query.scope, &mut resources, periods)
            .await?;
        let summary = self
            .aggregator
            .collection(&query.scope, resources, &periods, &self.context(query.range))?;
        Ok(summary.with_gaps(gaps).apply_filters(filters))
    }

    /// Drop charges of resources the inventory places outside `scope`
    ///
    /// Billing for a collection may cover the whole account. Billed ids the
    /// scoped listing lacks are looked up everywhere: those found elsewhere are
    /// removed, those found inside the scope join `resources`, and ids nobody
    /// knows are left for the aggregator to report as placeholders.
    async fn narrow_to_scope(
        &self,
        scope: &Scope,
        resources: &mut Vec<ResourceMetadata>,
        mut periods: Vec<CostPeriod>,
    ) -> Result<Vec<CostPeriod>> {
        let listed: HashSet<String> = resources.iter().map(|r| normalize_id(&r.id)).collect();
        let mut unlisted: Vec<String> = periods
            .iter()
            .flat_map(|period| &period.items)
            .filter_map(|item| item.resource_id.as_deref())
            .map(normalize_id)
            .filter(|id| !listed.contains(id))
            .collect();
        unlisted.sort();
        unlisted.dedup();
        if unlisted.is_empty() {
            return Ok(periods);
        }

        let located = match self.inventory.locate(&unlisted).await {
            Ok(located) => located,
            Err(e) if e.is_fatal() || e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(%scope, error = %e, "cannot locate billed resources, keeping their charges");
                return Ok(periods);
            }
        };

        let mut outside = HashSet::new();
        for resource in located {
            let id = normalize_id(&resource.id);
            if scope.covers(&resource) {
                if !listed.contains(&id) {
                    resources.push(resource);
                }
            } else {
                outside.insert(id);
            }
        }
        if !outside.is_empty() {
            debug!(%scope, excluded = outside.len(), "dropping charges billed outside the scope");
            exclude_resources(&mut periods, &outside)?;
        }
        Ok(periods)
    }
}

fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Remove items billed to `excluded` ids and take their cost off the period total
fn exclude_resources(periods: &mut [CostPeriod], excluded: &HashSet<String>) -> Result<()> {
    for period in periods.iter_mut() {
        let mut dropped = Decimal::ZERO;
        period.items.retain(|item| {
            let outside = item
                .resource_id
                .as_deref()
                .is_some_and(|id| excluded.contains(&normalize_id(id)));
            if outside {
                dropped += item.amount.amount();
            }
            !outside
        });
        if dropped.is_zero() {
            continue;
        }
        if let Some(total) = period.reported_total.take() {
            let dropped = Money::new(dropped, total.unit())?;
            period.reported_total = Some(total.saturating_sub(&dropped)?);
        }
    }
    Ok(())
}

/// A billing "no data" answer becomes an empty result plus a gap
fn tolerate_missing_data(
    billed: Result<Vec<CostPeriod>>,
    subject: &str,
) -> Result<(Vec<CostPeriod>, Vec<DataGap>)> {
    match billed {
        Ok(periods) => Ok((periods, Vec::new())),
        Err(CostDrillError::NoDataForDate { date }) => {
            debug!(subject, %date, "no billing data, treating as zero cost");
            Ok((
                Vec::new(),
                vec![DataGap::new(subject, GapKind::NoDataForDate { date })],
            ))
        }
        Err(e) => Err(e),
    }
}
