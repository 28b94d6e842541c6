use std::future::Future;

use crate::error::Result;
use crate::models::{CostPeriod, ResourceMetadata};
use crate::query::{QueryDescriptor, Scope};

/// A billing query is the same structured descriptor the cache key is built from
pub type BillingQuery = QueryDescriptor;

/// Upstream billing API
///
/// Calls must be idempotent: the facade may issue the same query again after a
/// throttling error or a cache expiry. Periods come back ordered by date.
/// Failures are `Authentication`, `NotEnabled`, `Throttling` or
/// `NoDataForDate`.
pub trait BillingSource: Send + Sync + 'static {
    fn fetch_costs(
        &self,
        query: &BillingQuery,
    ) -> impl Future<Output = Result<Vec<CostPeriod>>> + Send;
}

/// Upstream resource inventory
///
/// A resource scope that matches nothing fails with `ResourceNotFound`; a
/// collection scope that matches nothing is an empty list.
pub trait InventorySource: Send + Sync + 'static {
    fn list_resources(
        &self,
        scope: &Scope,
    ) -> impl Future<Output = Result<Vec<ResourceMetadata>>> + Send;

    /// Metadata for `ids` in any region; ids nobody knows are left out
    fn locate(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<ResourceMetadata>>> + Send;
}
