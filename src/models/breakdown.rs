use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::{CostCategory, Money};

/// Hours in an average month, used for GB-month normalisation
pub const HOURS_PER_MONTH: Decimal = Decimal::from_parts(730, 0, 0, false, 0);

/// Largest drift tolerated between the category sum and the total (one cent)
pub const RECONCILIATION_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Category-bucketed cost for one resource over one time range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub resource_id: String,
    pub total_cost: Money,

    pub compute_cost: Money,
    pub storage_cost: Money,
    pub data_transfer_cost: Money,
    pub snapshot_cost: Money,
    pub floating_ip_cost: Money,
    pub other_cost: Money,

    /// Raw dimension key to the amount billed under it
    pub dimension_costs: BTreeMap<String, Money>,

    pub running_hours: Decimal,
    pub storage_gb_hours: Decimal,
}

impl CostBreakdown {
    /// All-zero breakdown, used when a resource has no billing data
    pub fn empty(resource_id: &str, unit: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            total_cost: Money::zero(unit),
            compute_cost: Money::zero(unit),
            storage_cost: Money::zero(unit),
            data_transfer_cost: Money::zero(unit),
            snapshot_cost: Money::zero(unit),
            floating_ip_cost: Money::zero(unit),
            other_cost: Money::zero(unit),
            dimension_costs: BTreeMap::new(),
            running_hours: Decimal::ZERO,
            storage_gb_hours: Decimal::ZERO,
        }
    }

    pub fn unit(&self) -> &str {
        self.total_cost.unit()
    }

    pub fn category_cost(&self, category: CostCategory) -> &Money {
        match category {
            CostCategory::Compute => &self.compute_cost,
            CostCategory::Storage => &self.storage_cost,
            CostCategory::DataTransfer => &self.data_transfer_cost,
            CostCategory::Snapshot => &self.snapshot_cost,
            CostCategory::FloatingIp => &self.floating_ip_cost,
            CostCategory::Other => &self.other_cost,
        }
    }

    /// Share of the total spent in `category`, as a percentage
    pub fn percentage(&self, category: CostCategory) -> Decimal {
        self.category_cost(category).percentage_of(&self.total_cost)
    }

    pub fn percentages(&self) -> BTreeMap<CostCategory, Decimal> {
        CostCategory::ALL
            .into_iter()
            .map(|category| (category, self.percentage(category)))
            .collect()
    }

    /// Total cost spread over running hours; zero when nothing ran
    pub fn cost_per_hour(&self) -> Money {
        self.total_cost.per(self.running_hours)
    }

    /// Storage cost normalised to one GB held for a month
    pub fn cost_per_gb_month(&self) -> Money {
        self.storage_cost
            .per(self.storage_gb_hours / HOURS_PER_MONTH)
    }

    pub fn category_sum(&self) -> Result<Money> {
        Money::sum(
            self.unit(),
            CostCategory::ALL
                .iter()
                .map(|category| self.category_cost(*category)),
        )
    }

    /// True when the six categories add up to the total within one cent
    pub fn reconciles(&self) -> bool {
        match self.category_sum() {
            Ok(sum) => (sum.amount() - self.total_cost.amount()).abs() <= RECONCILIATION_TOLERANCE,
            Err(_) => false,
        }
    }
}

/// Change between two breakdowns, `current` measured against `baseline`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostChange {
    pub absolute: Decimal,
    pub percentage: Decimal,
}

impl CostChange {
    fn between(current: &Money, baseline: &Money) -> Self {
        let absolute = current.amount() - baseline.amount();
        let percentage = if baseline.is_zero() {
            Decimal::ZERO
        } else {
            (absolute / baseline.amount() * Decimal::ONE_HUNDRED).normalize()
        };
        Self {
            absolute: absolute.normalize(),
            percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostComparison {
    pub total_cost: CostChange,
    pub compute_cost: CostChange,
    pub storage_cost: CostChange,
    pub data_transfer_cost: CostChange,
}

impl CostComparison {
    pub fn compare(current: &CostBreakdown, baseline: &CostBreakdown) -> Result<Self> {
        current.total_cost.ensure_same_unit(&baseline.total_cost)?;
        Ok(Self {
            total_cost: CostChange::between(&current.total_cost, &baseline.total_cost),
            compute_cost: CostChange::between(&current.compute_cost, &baseline.compute_cost),
            storage_cost: CostChange::between(&current.storage_cost, &baseline.storage_cost),
            data_transfer_cost: CostChange::between(
                &current.data_transfer_cost,
                &baseline.data_transfer_cost,
            ),
        })
    }
}
