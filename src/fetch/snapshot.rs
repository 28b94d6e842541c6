use std::path::{Path, PathBuf};
use tracing::debug;

use super::parser::parse_cost_and_usage;
use super::source::{BillingQuery, BillingSource, InventorySource};
use crate::error::{CostDrillError, Result};
use crate::models::{CostPeriod, ResourceMetadata};
use crate::query::Scope;

/// Billing source backed by a saved GetCostAndUsage response
///
/// The file is re-read on every call so an updated export is picked up
/// without restarting. Periods are always daily; the aggregator re-buckets.
#[derive(Debug, Clone)]
pub struct SnapshotBilling {
    path: PathBuf,
}

impl SnapshotBilling {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BillingSource for SnapshotBilling {
    async fn fetch_costs(&self, query: &BillingQuery) -> Result<Vec<CostPeriod>> {
        debug!(path = %self.path.display(), scope = %query.scope, range = %query.range, "reading billing snapshot");
        let json = read_snapshot(&self.path).await?;
        let periods = parse_cost_and_usage(&json)?;

        let in_range: Vec<CostPeriod> = periods
            .into_iter()
            .filter(|period| query.range.contains(period.date))
            .map(|period| narrow_to_scope(period, &query.scope))
            .collect();

        if in_range.is_empty() {
            return Err(CostDrillError::NoDataForDate {
                date: query.range.start(),
            });
        }
        Ok(in_range)
    }
}

/// A resource query only sees that resource's items. The period total covers
/// the whole account, so it no longer applies and is dropped. The export
/// carries no regions, so collection scopes get every item and are narrowed
/// against the inventory by the caller.
fn narrow_to_scope(mut period: CostPeriod, scope: &Scope) -> CostPeriod {
    if let Scope::Resource { id } = scope {
        period.items.retain(|item| {
            item.resource_id
                .as_deref()
                .is_some_and(|resource_id| resource_id.eq_ignore_ascii_case(id.trim()))
        });
        period.reported_total = None;
    }
    period
}

/// Inventory source backed by a JSON array of resource metadata
#[derive(Debug, Clone)]
pub struct SnapshotInventory {
    path: PathBuf,
}

impl SnapshotInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<ResourceMetadata>> {
        let json = read_snapshot(&self.path).await?;
        serde_json::from_str(&json)
            .map_err(|e| CostDrillError::MalformedResponse(format!("inventory: {}", e)))
    }
}

impl InventorySource for SnapshotInventory {
    async fn list_resources(&self, scope: &Scope) -> Result<Vec<ResourceMetadata>> {
        debug!(path = %self.path.display(), %scope, "reading inventory snapshot");
        let matched: Vec<ResourceMetadata> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|resource| scope.covers(resource))
            .collect();

        match scope {
            Scope::Resource { id } if matched.is_empty() => {
                Err(CostDrillError::resource_not_found("resource", id))
            }
            _ => Ok(matched),
        }
    }

    async fn locate(&self, ids: &[String]) -> Result<Vec<ResourceMetadata>> {
        debug!(path = %self.path.display(), count = ids.len(), "locating resources in inventory snapshot");
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|resource| ids.iter().any(|id| id.trim().eq_ignore_ascii_case(resource.id.trim())))
            .collect())
    }
}

async fn read_snapshot(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        CostDrillError::MalformedResponse(format!("cannot read {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LifecycleState, TimeRange};
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BILLING: &str = r#"{"ResultsByTime": [
        {
            "TimePeriod": {"Start": "2024-03-01", "End": "2024-03-02"},
            "Total": {"UnblendedCost": {"Amount": "30", "Unit": "USD"}},
            "Groups": [
                {"Keys": ["i-1", "BoxUsage:t3.large"], "Metrics": {"UnblendedCost": {"Amount": "20", "Unit": "USD"}}},
                {"Keys": ["i-2", "EBS:VolumeUsage.gp3"], "Metrics": {"UnblendedCost": {"Amount": "10", "Unit": "USD"}}}
            ]
        },
        {
            "TimePeriod": {"Start": "2024-04-01", "End": "2024-04-02"},
            "Groups": [
                {"Keys": ["i-1", "BoxUsage:t3.large"], "Metrics": {"UnblendedCost": {"Amount": "5", "Unit": "USD"}}}
            ]
        }
    ]}"#;

    const INVENTORY: &str = r#"[
        {"id": "i-1", "resource_type": "ec2", "region": "us-east-1", "state": "running"},
        {"id": "i-2", "resource_type": "ec2", "region": "us-east-1", "state": "stopped"},
        {"id": "vol-9", "resource_type": "ebs", "region": "eu-west-1", "state": "running"}
    ]"#;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn march() -> TimeRange {
        TimeRange::parse("2024-03-01", "2024-04-01").unwrap()
    }

    #[tokio::test]
    async fn test_billing_filters_range_and_resource() {
        let file = write_temp(BILLING);
        let billing = SnapshotBilling::new(file.path());

        let collection = billing
            .fetch_costs(&BillingQuery::new(Scope::region("us-east-1"), march()))
            .await
            .unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection[0].items.len(), 2);
        assert!(collection[0].reported_total.is_some());

        let single = billing
            .fetch_costs(&BillingQuery::new(Scope::resource("I-1"), march()))
            .await
            .unwrap();
        assert_eq!(single[0].items.len(), 1);
        assert_eq!(single[0].items[0].amount.amount(), dec!(20));
        assert!(single[0].reported_total.is_none());
    }

    #[tokio::test]
    async fn test_billing_without_data_in_range() {
        let file = write_temp(BILLING);
        let billing = SnapshotBilling::new(file.path());
        let range = TimeRange::parse("2023-01-01", "2023-02-01").unwrap();

        let result = billing
            .fetch_costs(&BillingQuery::new(Scope::region("us-east-1"), range))
            .await;
        assert_eq!(
            result,
            Err(CostDrillError::NoDataForDate {
                date: range.start()
            })
        );
    }

    #[tokio::test]
    async fn test_inventory_scopes() {
        let file = write_temp(INVENTORY);
        let inventory = SnapshotInventory::new(file.path());

        let region = inventory
            .list_resources(&Scope::region("us-east-1"))
            .await
            .unwrap();
        assert_eq!(region.len(), 2);

        let typed = inventory
            .list_resources(&Scope::region_and_type("eu-west-1", "EBS"))
            .await
            .unwrap();
        assert_eq!(typed.len(), 1);
        assert_eq!(typed[0].id, "vol-9");

        let single = inventory.list_resources(&Scope::resource("i-2")).await.unwrap();
        assert_eq!(single[0].state, LifecycleState::Stopped);

        let missing = inventory.list_resources(&Scope::resource("i-404")).await;
        assert!(matches!(missing, Err(CostDrillError::ResourceNotFound { .. })));
    }

    #[tokio::test]
    async fn test_locate_searches_every_region() {
        let file = write_temp(INVENTORY);
        let inventory = SnapshotInventory::new(file.path());

        let ids = vec!["VOL-9".to_string(), "i-404".to_string()];
        let found = inventory.locate(&ids).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].region, "eu-west-1");
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let inventory = SnapshotInventory::new("/nonexistent/costdrill/inventory.json");
        let result = inventory.list_resources(&Scope::region("us-east-1")).await;
        assert!(matches!(result, Err(CostDrillError::MalformedResponse(_))));
    }
}
