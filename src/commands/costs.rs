use anyhow::{Context, Result};
use chrono::{Datelike, Months, NaiveDate, Utc};
use serde_json::{json, Value};
use std::future::Future;
use tracing::{info, warn};

use crate::config::{expand_home, Config};
use crate::error::CostDrillError;
use crate::facade::CostDrill;
use crate::fetch::{SnapshotBilling, SnapshotInventory};
use crate::models::{CollectionFilter, CollectionSummary, DataGap, Granularity, ResourceWithCost, TimeRange};
use crate::query::Scope;

pub type SnapshotDrill = CostDrill<SnapshotBilling, SnapshotInventory>;

/// Global flags every cost command shares
#[derive(Debug, Clone, Default)]
pub struct CostOptions {
    pub since: Option<String>,
    pub until: Option<String>,
    pub billing: Option<String>,
    pub inventory: Option<String>,
    pub no_cache: bool,
}

/// Facade over the snapshot files named by flags or config
pub fn build_drill(config: &Config, options: &CostOptions) -> Result<SnapshotDrill> {
    let billing = options
        .billing
        .as_deref()
        .unwrap_or(&config.fetch.billing_snapshot);
    let inventory = options
        .inventory
        .as_deref()
        .unwrap_or(&config.fetch.inventory_snapshot);

    let table = config.classification_table()?;
    let mut settings = config.facade_settings();
    if options.no_cache {
        settings.cache_enabled = false;
    }

    Ok(CostDrill::new(
        SnapshotBilling::new(expand_home(billing)),
        SnapshotInventory::new(expand_home(inventory)),
        table,
        settings,
    ))
}

/// `--since`/`--until`, or the configured number of days ending today
///
/// With monthly granularity the bounds left to default widen to whole months.
pub fn resolve_range(config: &Config, since: Option<&str>, until: Option<&str>) -> Result<TimeRange> {
    resolve_range_on(config, since, until, Utc::now().date_naive())
}

fn resolve_range_on(
    config: &Config,
    since: Option<&str>,
    until: Option<&str>,
    today: NaiveDate,
) -> Result<TimeRange> {
    let monthly = config.query.granularity == Granularity::Monthly;
    let range = match (since, until) {
        (Some(since), Some(until)) => TimeRange::parse(since, until)?,
        (Some(since), None) => {
            let end = if monthly { round_up_to_month(today)? } else { today };
            TimeRange::new(parse_date(since)?, end)?
        }
        (None, Some(until)) => {
            let days = TimeRange::last_days(parse_date(until)?, config.query.default_days)?;
            if monthly {
                TimeRange::new(TimeRange::bucket_of(days.start(), Granularity::Monthly), days.end())?
            } else {
                days
            }
        }
        (None, None) => {
            let days = TimeRange::last_days(today, config.query.default_days)?;
            if monthly {
                TimeRange::new(
                    TimeRange::bucket_of(days.start(), Granularity::Monthly),
                    round_up_to_month(days.end())?,
                )?
            } else {
                days
            }
        }
    };
    Ok(range)
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").with_context(|| format!("Invalid date: {}", value))
}

/// Push an exclusive end date forward to the next first of a month
fn round_up_to_month(end: NaiveDate) -> Result<NaiveDate> {
    if end.day() == 1 {
        return Ok(end);
    }
    TimeRange::bucket_of(end, Granularity::Monthly)
        .checked_add_months(Months::new(1))
        .with_context(|| format!("Date out of range: {}", end))
}

/// Run `op`, sleeping and retrying while the billing API throttles
pub async fn with_throttle_retry<T, F, Fut>(max_retries: u32, mut op: F) -> crate::error::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::error::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if attempt < max_retries => match e.retry_after() {
                Some(delay) => {
                    attempt += 1;
                    warn!(attempt, delay_secs = delay.as_secs(), "throttled, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
            result => return result,
        }
    }
}

fn parse_filters(expressions: &[String]) -> Result<Vec<CollectionFilter>> {
    expressions
        .iter()
        .map(|expression| CollectionFilter::parse(expression).map_err(anyhow::Error::from))
        .collect()
}

fn collection_scope(config: &Config, region: Option<String>, resource_type: Option<String>) -> Scope {
    let region = region.unwrap_or_else(|| config.query.region.clone());
    match resource_type {
        Some(resource_type) => Scope::region_and_type(&region, &resource_type),
        None => Scope::region(&region),
    }
}

pub async fn handle_resource_command(
    config: &Config,
    options: &CostOptions,
    id: &str,
    baseline: Option<(String, String)>,
) -> Result<()> {
    let drill = build_drill(config, options)?;
    let range = resolve_range(config, options.since.as_deref(), options.until.as_deref())?;
    let retries = config.fetch.max_throttle_retries;

    let view = with_throttle_retry(retries, || drill.get_breakdown(id, range)).await?;
    let waste = drill.waste_for(id, range).await?;

    let mut body = resource_json(&view);
    body["waste"] = serde_json::to_value(&waste)?;

    if let Some((since, until)) = baseline {
        let baseline = TimeRange::parse(&since, &until)?;
        let comparison =
            with_throttle_retry(retries, || drill.compare(id, range, baseline)).await?;
        body["comparison"] = json!({
            "baseline": baseline,
            "change": comparison,
        });
    }

    info!(resource_id = id, stats = ?drill.stats(), "resource query done");
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub async fn handle_collection_command(
    config: &Config,
    options: &CostOptions,
    region: Option<String>,
    resource_type: Option<String>,
    filters: &[String],
    top: Option<usize>,
) -> Result<()> {
    let drill = build_drill(config, options)?;
    let range = resolve_range(config, options.since.as_deref(), options.until.as_deref())?;
    let scope = collection_scope(config, region, resource_type);
    let filters = parse_filters(filters)?;

    let summary = with_throttle_retry(config.fetch.max_throttle_retries, || {
        drill.get_collection(&scope, range, &filters)
    })
    .await?;

    let limit = top.map(|n| if n == 0 { config.analysis.top_n } else { n });
    println!("{}", serde_json::to_string_pretty(&collection_json(&summary, limit))?);
    Ok(())
}

pub async fn handle_waste_command(
    config: &Config,
    options: &CostOptions,
    id: Option<String>,
    region: Option<String>,
    resource_type: Option<String>,
    filters: &[String],
) -> Result<()> {
    let drill = build_drill(config, options)?;
    let range = resolve_range(config, options.since.as_deref(), options.until.as_deref())?;
    let retries = config.fetch.max_throttle_retries;

    let body = match id {
        Some(id) => {
            let indicator = with_throttle_retry(retries, || drill.waste_for(&id, range)).await?;
            json!({ "resource_id": id, "range": range, "indicator": indicator })
        }
        None => {
            let scope = collection_scope(config, region, resource_type);
            let filters = parse_filters(filters)?;
            let report = with_throttle_retry(retries, || {
                drill.waste_report(&scope, range, &filters)
            })
            .await?;
            serde_json::to_value(&report)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub fn resource_json(view: &ResourceWithCost) -> Value {
    let breakdown = &view.breakdown;
    json!({
        "resource": view.resource,
        "range": view.range,
        "partial": view.is_partial(),
        "breakdown": breakdown,
        "percentages": breakdown.percentages(),
        "cost_per_hour": breakdown.cost_per_hour(),
        "cost_per_gb_month": breakdown.cost_per_gb_month(),
        "daily_cost": view.daily_cost(),
        "monthly_projection": view.monthly_projection(),
        "time_series": view.time_series,
        "gaps": view.gaps,
        "issues": issues(&view.gaps),
    })
}

/// Human-readable message for each gap
fn issues(gaps: &[DataGap]) -> Vec<String> {
    gaps.iter().map(|gap| gap.to_error().to_string()).collect()
}

pub fn collection_json(summary: &CollectionSummary, top: Option<usize>) -> Value {
    let resources: Vec<Value> = match top {
        Some(limit) => summary.top_n(limit).into_iter().map(resource_json).collect(),
        None => summary.resources().iter().map(resource_json).collect(),
    };
    json!({
        "scope": summary.scope,
        "range": summary.range,
        "partial": summary.is_partial(),
        "resource_count": summary.resource_count(),
        "running_count": summary.running_count(),
        "stopped_count": summary.stopped_count(),
        "total_cost": summary.total_cost(),
        "average_cost_per_resource": summary.average_cost_per_resource(),
        "unattributed_cost": summary.unattributed_cost(),
        "failed_resources": summary.failed_resources(),
        "gaps": summary.gaps(),
        "issues": issues(summary.gaps()),
        "resources": resources,
    })
}

/// Map a library error to the process exit code
pub fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<CostDrillError>() {
        Some(CostDrillError::Authentication(_)) | Some(CostDrillError::NotEnabled) => 3,
        Some(CostDrillError::Throttling { .. }) => 4,
        Some(CostDrillError::ResourceNotFound { .. }) => 5,
        Some(CostDrillError::InvalidQuery(_)) => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CostBreakdown, GapKind, LifecycleState, Money, ResourceMetadata};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_throttle_retry_sleeps_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_throttle_retry(2, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CostDrillError::Throttling { retry_after_secs: 1 })
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_retry_gives_up() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: crate::error::Result<()> = with_throttle_retry(1, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CostDrillError::Throttling { retry_after_secs: 1 })
        })
        .await;
        assert!(matches!(result, Err(CostDrillError::Throttling { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: crate::error::Result<()> = with_throttle_retry(5, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CostDrillError::Authentication("expired".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_range() {
        let config = Config::default();
        let explicit = resolve_range(&config, Some("2024-03-01"), Some("2024-04-01")).unwrap();
        assert_eq!(explicit.days(), 31);

        let ending = resolve_range(&config, None, Some("2024-04-01")).unwrap();
        assert_eq!(ending.days(), 30);
        assert_eq!(ending.end().to_string(), "2024-04-01");

        assert!(resolve_range(&config, Some("2024-04-01"), Some("2024-03-01")).is_err());
    }

    #[test]
    fn test_monthly_defaults_cover_whole_months() {
        let mut config = Config::default();
        config.set_value("query.granularity", "MONTHLY").unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 18).unwrap();

        let defaulted = resolve_range_on(&config, None, None, today).unwrap();
        assert_eq!(defaulted.to_string(), "2024-02-01..2024-04-01");
        assert!(defaulted.partition(Granularity::Monthly).is_ok());

        let since = resolve_range_on(&config, Some("2024-01-01"), None, today).unwrap();
        assert_eq!(since.end().to_string(), "2024-04-01");

        let until = resolve_range_on(&config, None, Some("2024-03-01"), today).unwrap();
        assert_eq!(until.to_string(), "2024-01-01..2024-03-01");

        let first_of_month = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let aligned = resolve_range_on(&config, None, None, first_of_month).unwrap();
        assert_eq!(aligned.to_string(), "2024-01-01..2024-03-01");

        let daily = resolve_range_on(&Config::default(), None, None, today).unwrap();
        assert_eq!(daily.days(), 30);
    }

    #[test]
    fn test_gap_messages_are_rendered() {
        let range = TimeRange::parse("2024-03-01", "2024-03-02").unwrap();
        let summary = CollectionSummary::new(
            "region:us-east-1",
            range,
            Vec::new(),
            vec![DataGap::new("i-9", GapKind::MetadataMissing)],
            Money::zero("USD"),
        )
        .unwrap();
        let body = collection_json(&summary, None);
        let issues = body["issues"].as_array().unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0]
            .as_str()
            .unwrap()
            .starts_with("incomplete cost data for 'i-9'"));

        let view = ResourceWithCost {
            resource: ResourceMetadata::new("i-9", "ec2", "us-east-1", LifecycleState::Running),
            breakdown: CostBreakdown::empty("i-9", "USD"),
            range,
            time_series: Vec::new(),
            gaps: Vec::new(),
        };
        assert!(resource_json(&view)["issues"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_exit_codes() {
        let throttled = anyhow::Error::from(CostDrillError::Throttling { retry_after_secs: 1 });
        assert_eq!(exit_code(&throttled), 4);
        let other = anyhow::anyhow!("disk full");
        assert_eq!(exit_code(&other), 1);
    }
}
