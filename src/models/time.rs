use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CostDrillError, Result};
use crate::models::Money;

/// Time bucket size for cost time series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    Daily,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "DAILY",
            Granularity::Monthly => "MONTHLY",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.to_uppercase().as_str() {
            "DAILY" => Ok(Granularity::Daily),
            "MONTHLY" => Ok(Granularity::Monthly),
            other => Err(CostDrillError::InvalidQuery(format!(
                "unknown granularity '{}', expected DAILY or MONTHLY",
                other
            ))),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar date range, start inclusive and end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TimeRangeRepr")]
pub struct TimeRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct TimeRangeRepr {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<TimeRangeRepr> for TimeRange {
    type Error = CostDrillError;

    fn try_from(repr: TimeRangeRepr) -> Result<Self> {
        TimeRange::new(repr.start, repr.end)
    }
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end <= start {
            return Err(CostDrillError::InvalidQuery(format!(
                "end date {} must be after start date {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// The `days` whole days ending today (today excluded, matching billing finality)
    pub fn last_days(today: NaiveDate, days: u32) -> Result<Self> {
        let start = today - Duration::days(i64::from(days));
        Self::new(start, today)
    }

    /// Parse `YYYY-MM-DD` bounds
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse_date = |value: &str| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
                CostDrillError::InvalidQuery(format!("invalid date '{}': {}", value, e))
            })
        };
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Range length in whole days, never less than one
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days().max(1)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    pub fn start_datetime(&self) -> DateTime<Utc> {
        self.start.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    pub fn end_datetime(&self) -> DateTime<Utc> {
        self.end.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// Bucket start dates covering the range at `granularity`
    ///
    /// Monthly buckets require both bounds to fall on the first of a month so the
    /// buckets partition the range exactly.
    pub fn partition(&self, granularity: Granularity) -> Result<Vec<NaiveDate>> {
        match granularity {
            Granularity::Daily => Ok(self
                .start
                .iter_days()
                .take_while(|date| *date < self.end)
                .collect()),
            Granularity::Monthly => {
                if self.start.day() != 1 || self.end.day() != 1 {
                    return Err(CostDrillError::InvalidQuery(format!(
                        "monthly granularity needs month-aligned bounds, got {} to {}",
                        self.start, self.end
                    )));
                }
                let mut buckets = Vec::new();
                let mut cursor = self.start;
                while cursor < self.end {
                    buckets.push(cursor);
                    cursor = next_month(cursor)?;
                }
                Ok(buckets)
            }
        }
    }

    /// Start of the bucket that `date` falls into
    pub fn bucket_of(date: NaiveDate, granularity: Granularity) -> NaiveDate {
        match granularity {
            Granularity::Daily => date,
            Granularity::Monthly => date.with_day(1).unwrap_or(date),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

fn next_month(date: NaiveDate) -> Result<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| CostDrillError::InvalidQuery(format!("date overflow after {}", date)))
}

/// One bucket of a cost time series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: NaiveDate,
    pub cost: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_end_must_follow_start() {
        assert!(TimeRange::new(date(2024, 3, 1), date(2024, 3, 1)).is_err());
        assert!(TimeRange::new(date(2024, 3, 2), date(2024, 3, 1)).is_err());
        assert!(TimeRange::new(date(2024, 3, 1), date(2024, 3, 2)).is_ok());
    }

    #[test]
    fn test_days_and_contains() {
        let range = TimeRange::new(date(2024, 3, 1), date(2024, 3, 31)).unwrap();
        assert_eq!(range.days(), 30);
        assert!(range.contains(date(2024, 3, 1)));
        assert!(range.contains(date(2024, 3, 30)));
        assert!(!range.contains(date(2024, 3, 31)));
    }

    #[test]
    fn test_daily_partition() {
        let range = TimeRange::new(date(2024, 2, 27), date(2024, 3, 2)).unwrap();
        let buckets = range.partition(Granularity::Daily).unwrap();
        assert_eq!(
            buckets,
            vec![date(2024, 2, 27), date(2024, 2, 28), date(2024, 2, 29), date(2024, 3, 1)]
        );
    }

    #[test]
    fn test_monthly_partition_requires_alignment() {
        let aligned = TimeRange::new(date(2023, 11, 1), date(2024, 2, 1)).unwrap();
        assert_eq!(
            aligned.partition(Granularity::Monthly).unwrap(),
            vec![date(2023, 11, 1), date(2023, 12, 1), date(2024, 1, 1)]
        );

        let unaligned = TimeRange::new(date(2024, 1, 15), date(2024, 2, 1)).unwrap();
        assert!(unaligned.partition(Granularity::Monthly).is_err());
    }

    #[test]
    fn test_last_days() {
        let range = TimeRange::last_days(date(2024, 4, 1), 30).unwrap();
        assert_eq!(range.start(), date(2024, 3, 2));
        assert_eq!(range.end(), date(2024, 4, 1));
        assert!(TimeRange::last_days(date(2024, 4, 1), 0).is_err());
    }

    #[test]
    fn test_parse_and_granularity() {
        let range = TimeRange::parse("2024-01-01", "2024-02-01").unwrap();
        assert_eq!(range.to_string(), "2024-01-01..2024-02-01");
        assert!(TimeRange::parse("01/01/2024", "2024-02-01").is_err());
        assert_eq!(Granularity::parse("monthly").unwrap(), Granularity::Monthly);
        assert!(Granularity::parse("HOURLY").is_err());
    }
}
