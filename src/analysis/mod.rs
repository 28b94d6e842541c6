// Analysis module: classification, aggregation and waste rules
pub mod aggregator;
pub mod classification;
pub mod waste;

pub use aggregator::{AggregationContext, CostAggregator};
pub use classification::{default_rules, ClassificationRule, ClassificationTable};
pub use waste::{
    WasteAnalyzer, WasteIndicator, WasteOpportunity, WasteReport, WasteRule,
    DEFAULT_HIGH_TRANSFER_FRACTION,
};
