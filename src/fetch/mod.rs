// Upstream collaborators: billing and inventory
pub mod parser;
pub mod snapshot;
pub mod source;

pub use parser::{parse_cost_and_usage, CostAndUsageResponse};
pub use snapshot::{SnapshotBilling, SnapshotInventory};
pub use source::{BillingQuery, BillingSource, InventorySource};
