// Cost data model
pub mod billing;
pub mod breakdown;
pub mod collection;
pub mod money;
pub mod resource;
pub mod time;

pub use billing::{CostCategory, CostLineItem, CostPeriod};
pub use breakdown::{CostBreakdown, CostChange, CostComparison};
pub use collection::{CollectionFilter, CollectionSummary, DataGap, GapKind, ResourceWithCost};
pub use money::{format_money, Money, DEFAULT_CURRENCY};
pub use resource::{LifecycleState, ResourceMetadata};
pub use time::{Granularity, TimeRange, TimeSeriesPoint};
