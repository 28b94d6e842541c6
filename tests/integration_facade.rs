use costdrill::analysis::ClassificationTable;
use costdrill::config::Config;
use costdrill::fetch::{SnapshotBilling, SnapshotInventory};
use costdrill::models::{CollectionFilter, CostCategory, GapKind, LifecycleState, TimeRange};
use costdrill::query::Scope;
use costdrill::{CostDrill, CostDrillError, FacadeSettings};
use rust_decimal_macros::dec;
use std::io::Write;
use tempfile::NamedTempFile;

/// End-to-end tests driving the facade from snapshot files

const BILLING: &str = r#"{"ResultsByTime": [
    {
        "TimePeriod": {"Start": "2024-03-01", "End": "2024-03-02"},
        "Total": {"UnblendedCost": {"Amount": "759.40", "Unit": "USD"}},
        "Groups": [
            {"Keys": ["i-web", "USE1-BoxUsage:t3.large"],
             "Metrics": {"UnblendedCost": {"Amount": "650.25", "Unit": "USD"},
                         "UsageQuantity": {"Amount": "24", "Unit": "Hrs"}}},
            {"Keys": ["i-web", "USE1-DataTransfer-Out-Bytes"],
             "Metrics": {"UnblendedCost": {"Amount": "98.75", "Unit": "USD"}}},
            {"Keys": ["i-old", "USE1-EBS:VolumeUsage.gp3"],
             "Metrics": {"UnblendedCost": {"Amount": "10.00", "Unit": "USD"},
                         "UsageQuantity": {"Amount": "2400", "Unit": "GB-Hrs"}}},
            {"Keys": ["i-old", "USE1-ElasticIP:IdleAddress"],
             "Metrics": {"UnblendedCost": {"Amount": "0.40", "Unit": "USD"}}}
        ]
    },
    {
        "TimePeriod": {"Start": "2024-03-02", "End": "2024-03-03"},
        "Groups": [
            {"Keys": ["i-old", "USE1-EBS:VolumeUsage.gp3"],
             "Metrics": {"UnblendedCost": {"Amount": "2.00", "Unit": "USD"}}}
        ]
    }
]}"#;

const INVENTORY: &str = r#"[
    {"id": "i-web", "resource_type": "ec2", "region": "us-east-1", "state": "running",
     "tags": {"env": "prod", "Name": "web-1"}},
    {"id": "i-old", "resource_type": "ec2", "region": "us-east-1", "state": "stopped",
     "tags": {"env": "dev"}},
    {"id": "i-idle", "resource_type": "ec2", "region": "us-east-1", "state": "running"},
    {"id": "i-eu", "resource_type": "ec2", "region": "eu-west-1", "state": "running"}
]"#;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

struct Fixture {
    _billing: NamedTempFile,
    _inventory: NamedTempFile,
    drill: CostDrill<SnapshotBilling, SnapshotInventory>,
}

fn fixture() -> Fixture {
    let billing = write_temp(BILLING);
    let inventory = write_temp(INVENTORY);
    let drill = CostDrill::new(
        SnapshotBilling::new(billing.path()),
        SnapshotInventory::new(inventory.path()),
        ClassificationTable::default(),
        FacadeSettings::default(),
    );
    Fixture {
        _billing: billing,
        _inventory: inventory,
        drill,
    }
}

fn march() -> TimeRange {
    TimeRange::parse("2024-03-01", "2024-04-01").unwrap()
}

#[tokio::test]
async fn test_resource_breakdown_from_snapshots() {
    let fixture = fixture();
    let view = fixture.drill.get_breakdown("i-web", march()).await.unwrap();

    assert_eq!(view.total_cost().amount(), dec!(749.00));
    assert_eq!(view.breakdown.compute_cost.amount(), dec!(650.25));
    assert_eq!(view.breakdown.data_transfer_cost.amount(), dec!(98.75));
    assert_eq!(view.breakdown.running_hours, dec!(24));
    assert!(view.breakdown.reconciles());
    assert_eq!(view.resource.name(), "web-1");
    assert_eq!(view.time_series.len(), 31);
    assert!(!view.is_partial());
}

#[tokio::test]
async fn test_stopped_resource_is_flagged_as_waste() {
    let fixture = fixture();
    let indicator = fixture.drill.waste_for("i-old", march()).await.unwrap();

    assert!(indicator.has_waste);
    assert!(indicator.stopped_with_cost);
    assert!(indicator.storage_dominant);
    assert!(indicator.idle_floating_ip);
    assert!(!indicator.high_transfer);

    let view = fixture.drill.get_breakdown("i-old", march()).await.unwrap();
    assert_eq!(view.total_cost().amount(), dec!(12.40));
    assert_eq!(view.breakdown.category_cost(CostCategory::Storage).amount(), dec!(12.00));
}

#[tokio::test]
async fn test_region_collection_and_report() {
    let fixture = fixture();
    let scope = Scope::region("us-east-1");

    let summary = fixture.drill.get_collection(&scope, march(), &[]).await.unwrap();
    assert_eq!(summary.resource_count(), 3);
    assert_eq!(summary.total_cost().amount(), dec!(761.40));
    assert_eq!(summary.running_count(), 2);
    assert_eq!(summary.stopped_count(), 1);
    assert_eq!(summary.failed_resources(), vec!["i-idle"]);
    assert!(summary.get("i-eu").is_none());

    let prod = fixture
        .drill
        .get_collection(&scope, march(), &[CollectionFilter::parse("tag:env=prod").unwrap()])
        .await
        .unwrap();
    assert_eq!(prod.resource_count(), 1);
    assert_eq!(prod.resources()[0].resource_id(), "i-web");

    let report = fixture.drill.waste_report(&scope, march(), &[]).await.unwrap();
    assert_eq!(report.resources_analyzed, 3);
    assert_eq!(report.opportunities.len(), 1);
    assert_eq!(report.opportunities[0].resource_id, "i-old");
    assert_eq!(report.opportunities[0].state, LifecycleState::Stopped);

    let stats = fixture.drill.stats();
    assert_eq!(stats.collections.misses, 2);
    assert_eq!(stats.collections.hits, 1);
}

#[tokio::test]
async fn test_missing_billing_window_degrades_to_zero() {
    let fixture = fixture();
    let january = TimeRange::parse("2024-01-01", "2024-02-01").unwrap();

    let view = fixture.drill.get_breakdown("i-web", january).await.unwrap();
    assert!(view.total_cost().is_zero());
    assert!(view
        .gaps
        .iter()
        .any(|gap| matches!(gap.kind, GapKind::NoDataForDate { .. })));
}

#[tokio::test]
async fn test_unknown_resource_is_not_found() {
    let fixture = fixture();
    let result = fixture.drill.get_breakdown("i-nope", march()).await;
    assert!(matches!(result, Err(CostDrillError::ResourceNotFound { .. })));
}

#[tokio::test]
async fn test_snapshot_update_visible_after_invalidate() {
    let billing = write_temp(BILLING);
    let inventory = write_temp(INVENTORY);
    let drill = CostDrill::new(
        SnapshotBilling::new(billing.path()),
        SnapshotInventory::new(inventory.path()),
        ClassificationTable::default(),
        FacadeSettings::default(),
    );

    let before = drill.get_breakdown("i-web", march()).await.unwrap();
    assert_eq!(before.total_cost().amount(), dec!(749.00));

    let updated = BILLING.replace("650.25", "700.25");
    std::fs::write(billing.path(), updated).unwrap();

    // Still served from cache until invalidated
    let cached = drill.get_breakdown("i-web", march()).await.unwrap();
    assert_eq!(cached.total_cost().amount(), dec!(749.00));

    assert_eq!(drill.invalidate("i-web"), 1);
    let fresh = drill.get_breakdown("i-web", march()).await.unwrap();
    assert_eq!(fresh.total_cost().amount(), dec!(799.00));
}

#[tokio::test]
async fn test_facade_built_from_config() {
    let mut config = Config::default();
    config.set_value("cache.enabled", "false").unwrap();
    let billing = write_temp(BILLING);
    let inventory = write_temp(INVENTORY);

    let drill = CostDrill::new(
        SnapshotBilling::new(billing.path()),
        SnapshotInventory::new(inventory.path()),
        config.classification_table().unwrap(),
        config.facade_settings(),
    );
    drill.get_breakdown("i-web", march()).await.unwrap();
    assert_eq!(drill.stats().breakdowns.entries, 0);
}

const ACCOUNT_BILLING: &str = r#"{"ResultsByTime": [
    {
        "TimePeriod": {"Start": "2024-03-01", "End": "2024-03-02"},
        "Total": {"UnblendedCost": {"Amount": "517.00", "Unit": "USD"}},
        "Groups": [
            {"Keys": ["i-us", "USE1-BoxUsage:t3.large"],
             "Metrics": {"UnblendedCost": {"Amount": "10.00", "Unit": "USD"}}},
            {"Keys": ["vol-us", "USE1-EBS:VolumeUsage.gp3"],
             "Metrics": {"UnblendedCost": {"Amount": "7.00", "Unit": "USD"}}},
            {"Keys": ["i-eu", "EU-BoxUsage:m5.24xlarge"],
             "Metrics": {"UnblendedCost": {"Amount": "500.00", "Unit": "USD"}}}
        ]
    }
]}"#;

const ACCOUNT_INVENTORY: &str = r#"[
    {"id": "i-us", "resource_type": "ec2", "region": "us-east-1", "state": "running"},
    {"id": "vol-us", "resource_type": "ebs", "region": "us-east-1", "state": "running"},
    {"id": "i-eu", "resource_type": "ec2", "region": "eu-west-1", "state": "running"}
]"#;

#[tokio::test]
async fn test_collections_only_count_their_own_region_and_type() {
    let billing = write_temp(ACCOUNT_BILLING);
    let inventory = write_temp(ACCOUNT_INVENTORY);
    let drill = CostDrill::new(
        SnapshotBilling::new(billing.path()),
        SnapshotInventory::new(inventory.path()),
        ClassificationTable::default(),
        FacadeSettings::default(),
    );

    let region = drill
        .get_collection(&Scope::region("us-east-1"), march(), &[])
        .await
        .unwrap();
    assert_eq!(region.total_cost().amount(), dec!(17.00));
    assert!(region.failed_resources().is_empty());
    assert!(region.get("i-eu").is_none());

    let volumes = drill
        .get_collection(&Scope::region_and_type("us-east-1", "ebs"), march(), &[])
        .await
        .unwrap();
    let ids: Vec<&str> = volumes.resources().iter().map(|r| r.resource_id()).collect();
    assert_eq!(ids, vec!["vol-us"]);
    assert_eq!(volumes.total_cost().amount(), dec!(7.00));

    let europe = drill
        .get_collection(&Scope::region("eu-west-1"), march(), &[])
        .await
        .unwrap();
    assert_eq!(europe.total_cost().amount(), dec!(500.00));
    assert!(!europe.is_partial());
}

#[tokio::test]
async fn test_invalidate_refreshes_cached_collection() {
    let billing = write_temp(BILLING);
    let inventory = write_temp(INVENTORY);
    let drill = CostDrill::new(
        SnapshotBilling::new(billing.path()),
        SnapshotInventory::new(inventory.path()),
        ClassificationTable::default(),
        FacadeSettings::default(),
    );
    let scope = Scope::region("us-east-1");

    let before = drill.get_collection(&scope, march(), &[]).await.unwrap();
    assert_eq!(before.total_cost().amount(), dec!(761.40));

    std::fs::write(billing.path(), BILLING.replace("650.25", "700.25")).unwrap();
    assert_eq!(drill.invalidate("i-web"), 1);

    let after = drill.get_collection(&scope, march(), &[]).await.unwrap();
    assert_eq!(after.total_cost().amount(), dec!(811.40));
}
