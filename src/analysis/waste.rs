use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::Result;
use crate::models::{
    CollectionSummary, CostBreakdown, LifecycleState, Money, ResourceWithCost, TimeRange,
};

/// Default share of total cost above which data transfer is flagged (30%)
pub const DEFAULT_HIGH_TRANSFER_FRACTION: Decimal = Decimal::from_parts(30, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WasteRule {
    StoppedWithCost,
    StorageDominant,
    HighTransfer,
    IdleFloatingIp,
}

impl WasteRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            WasteRule::StoppedWithCost => "stopped-with-cost",
            WasteRule::StorageDominant => "storage-dominant",
            WasteRule::HighTransfer => "high-transfer",
            WasteRule::IdleFloatingIp => "idle-floating-ip",
        }
    }
}

/// Outcome of the waste rules for one resource
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct WasteIndicator {
    pub has_waste: bool,
    pub stopped_with_cost: bool,
    pub storage_dominant: bool,
    pub high_transfer: bool,
    pub idle_floating_ip: bool,
    pub recommendations: Vec<String>,
}

impl WasteIndicator {
    /// Rules that fired, in evaluation order
    pub fn fired(&self) -> Vec<WasteRule> {
        [
            (self.stopped_with_cost, WasteRule::StoppedWithCost),
            (self.storage_dominant, WasteRule::StorageDominant),
            (self.high_transfer, WasteRule::HighTransfer),
            (self.idle_floating_ip, WasteRule::IdleFloatingIp),
        ]
        .into_iter()
        .filter_map(|(fired, rule)| fired.then_some(rule))
        .collect()
    }

    fn flag(&mut self, rule: WasteRule, recommendation: String) {
        match rule {
            WasteRule::StoppedWithCost => self.stopped_with_cost = true,
            WasteRule::StorageDominant => self.storage_dominant = true,
            WasteRule::HighTransfer => self.high_transfer = true,
            WasteRule::IdleFloatingIp => self.idle_floating_ip = true,
        }
        self.has_waste = true;
        self.recommendations.push(recommendation);
    }
}

/// A resource whose spend looks avoidable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WasteOpportunity {
    pub resource_id: String,
    pub name: String,
    pub state: LifecycleState,
    pub total_cost: Money,
    pub monthly_projection: Money,
    pub indicator: WasteIndicator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WasteReport {
    pub scope: String,
    pub range: TimeRange,
    pub resources_analyzed: usize,
    /// Combined total cost of the flagged resources
    pub flagged_cost: Money,
    pub opportunities: Vec<WasteOpportunity>,
}

/// Rule-based waste detection over breakdowns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WasteAnalyzer {
    high_transfer_fraction: Decimal,
}

impl Default for WasteAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_TRANSFER_FRACTION)
    }
}

impl WasteAnalyzer {
    /// `high_transfer_fraction` is clamped to `0..=1`
    pub fn new(high_transfer_fraction: Decimal) -> Self {
        Self {
            high_transfer_fraction: high_transfer_fraction.clamp(Decimal::ZERO, Decimal::ONE),
        }
    }

    pub fn high_transfer_fraction(&self) -> Decimal {
        self.high_transfer_fraction
    }

    pub fn analyze(&self, breakdown: &CostBreakdown, state: LifecycleState) -> WasteIndicator {
        let mut indicator = WasteIndicator::default();
        let total = breakdown.total_cost.amount();
        let has_cost = total > Decimal::ZERO;

        if state.is_halted() && has_cost {
            indicator.flag(
                WasteRule::StoppedWithCost,
                format!(
                    "Resource is {} but incurred {}. Deallocate it or release its attached storage.",
                    state, breakdown.total_cost
                ),
            );
        }

        if has_cost && breakdown.storage_cost.amount() > breakdown.compute_cost.amount() {
            indicator.flag(
                WasteRule::StorageDominant,
                format!(
                    "Storage costs ({}) exceed compute costs ({}). Review volume sizing and type.",
                    breakdown.storage_cost, breakdown.compute_cost
                ),
            );
        }

        if breakdown.data_transfer_cost.amount() > total * self.high_transfer_fraction {
            indicator.flag(
                WasteRule::HighTransfer,
                format!(
                    "Data transfer is {}% of total cost. Review egress patterns.",
                    breakdown
                        .data_transfer_cost
                        .percentage_of(&breakdown.total_cost)
                        .round_dp(1)
                ),
            );
        }

        if !breakdown.floating_ip_cost.is_zero() && !state.is_running() {
            indicator.flag(
                WasteRule::IdleFloatingIp,
                format!(
                    "Floating IP charges of {} on a {} resource. Release the address if unused.",
                    breakdown.floating_ip_cost, state
                ),
            );
        }

        indicator
    }

    pub fn analyze_resource(&self, resource: &ResourceWithCost) -> WasteIndicator {
        self.analyze(&resource.breakdown, resource.resource.state)
    }

    /// Resources with at least one finding, most expensive first, ties by id
    pub fn opportunities(&self, summary: &CollectionSummary) -> Vec<WasteOpportunity> {
        let mut opportunities: Vec<WasteOpportunity> = summary
            .resources()
            .iter()
            .filter_map(|resource| {
                let indicator = self.analyze_resource(resource);
                indicator.has_waste.then(|| WasteOpportunity {
                    resource_id: resource.resource_id().to_string(),
                    name: resource.name().to_string(),
                    state: resource.resource.state,
                    total_cost: resource.total_cost().clone(),
                    monthly_projection: resource.monthly_projection(),
                    indicator,
                })
            })
            .collect();

        opportunities.sort_by(|a, b| {
            b.total_cost
                .amount()
                .cmp(&a.total_cost.amount())
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        opportunities
    }

    pub fn report(&self, summary: &CollectionSummary) -> Result<WasteReport> {
        let opportunities = self.opportunities(summary);
        let flagged_cost = Money::sum(
            summary.unit(),
            opportunities.iter().map(|opportunity| &opportunity.total_cost),
        )?;
        Ok(WasteReport {
            scope: summary.scope.clone(),
            range: summary.range,
            resources_analyzed: summary.resource_count(),
            flagged_cost,
            opportunities,
        })
    }
}
