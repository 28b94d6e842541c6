//! Usage-type classification
//!
//! Billing dimension keys are free-form strings such as `USE1-BoxUsage:t3.large`
//! or `EBS:VolumeUsage.gp3`. They are sorted into cost categories by an ordered
//! rule table: the first rule whose pattern matches wins, and a key no rule
//! matches is "other".

use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{CostDrillError, Result};
use crate::models::CostCategory;

/// One entry of the classification table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub category: CostCategory,
    /// Case-insensitive regular expression searched anywhere in the key
    pub pattern: String,
}

impl ClassificationRule {
    pub fn new(category: CostCategory, pattern: &str) -> Self {
        Self {
            category,
            pattern: pattern.to_string(),
        }
    }
}

/// Built-in rules in priority order
///
/// Snapshots precede storage because snapshot keys also mention EBS.
pub fn default_rules() -> Vec<ClassificationRule> {
    use CostCategory::*;
    [
        (Compute, "BoxUsage"),
        (Compute, "HeavyUsage"),
        (Compute, "SpotUsage"),
        (Compute, "Reserved"),
        (Compute, "UnusedBox"),
        (Compute, "UnusedDed"),
        (Snapshot, "Snapshot"),
        (Storage, "EBS:"),
        (Storage, "VolumeUsage"),
        (Storage, "VolumeP-IOPS"),
        (DataTransfer, "DataTransfer"),
        (DataTransfer, "InterRegion"),
        (FloatingIp, "ElasticIP"),
        (FloatingIp, "IdleAddress"),
        (FloatingIp, "PublicIPv4"),
    ]
    .into_iter()
    .map(|(category, pattern)| ClassificationRule::new(category, pattern))
    .collect()
}

/// Compiled, ordered rule table
#[derive(Debug, Clone)]
pub struct ClassificationTable {
    rules: Vec<ClassificationRule>,
    matcher: RegexSet,
}

impl ClassificationTable {
    pub fn new(rules: Vec<ClassificationRule>) -> Result<Self> {
        // Compile one by one first so an error names the offending pattern
        for rule in &rules {
            RegexSetBuilder::new([&rule.pattern])
                .case_insensitive(true)
                .build()
                .map_err(|e| CostDrillError::InvalidClassificationRule {
                    pattern: rule.pattern.clone(),
                    reason: e.to_string(),
                })?;
        }

        let matcher = RegexSetBuilder::new(rules.iter().map(|rule| &rule.pattern))
            .case_insensitive(true)
            .build()
            .map_err(|e| CostDrillError::InvalidClassificationRule {
                pattern: "<table>".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self { rules, matcher })
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Category of the first matching rule, or `Other`
    pub fn classify(&self, dimension_key: &str) -> CostCategory {
        self.matcher
            .matches(dimension_key)
            .iter()
            .next()
            .map(|index| self.rules[index].category)
            .unwrap_or(CostCategory::Other)
    }
}

impl Default for ClassificationTable {
    fn default() -> Self {
        let rules = default_rules();
        let matcher = RegexSetBuilder::new(rules.iter().map(|rule| regex::escape(&rule.pattern)))
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|_| RegexSet::empty());
        Self { rules, matcher }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        let table = ClassificationTable::default();
        let cases = [
            ("BoxUsage:t3.large", CostCategory::Compute),
            ("USE1-SpotUsage:m5.xlarge", CostCategory::Compute),
            ("HeavyUsage:c5.large", CostCategory::Compute),
            ("EBS:VolumeUsage.gp3", CostCategory::Storage),
            ("EBS:VolumeP-IOPS.piops", CostCategory::Storage),
            ("EBS:SnapshotUsage", CostCategory::Snapshot),
            ("DataTransfer-Out-Bytes", CostCategory::DataTransfer),
            ("USE1-USW2-AWS-InterRegion-Out", CostCategory::DataTransfer),
            ("ElasticIP:IdleAddress", CostCategory::FloatingIp),
            ("PublicIPv4:InUseAddress", CostCategory::FloatingIp),
            ("CW:Requests", CostCategory::Other),
            ("", CostCategory::Other),
        ];
        for (key, expected) in cases {
            assert_eq!(table.classify(key), expected, "key {:?}", key);
        }
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let table = ClassificationTable::default();
        assert_eq!(table.classify("boxusage:t3.micro"), CostCategory::Compute);
        assert_eq!(table.classify("DATATRANSFER-IN"), CostCategory::DataTransfer);
    }

    #[test]
    fn test_first_rule_wins() {
        // Matches both a compute and a transfer token; compute is listed first
        let table = ClassificationTable::default();
        assert_eq!(
            table.classify("BoxUsage-DataTransfer"),
            CostCategory::Compute
        );

        let reordered = ClassificationTable::new(vec![
            ClassificationRule::new(CostCategory::DataTransfer, "DataTransfer"),
            ClassificationRule::new(CostCategory::Compute, "BoxUsage"),
        ])
        .unwrap();
        assert_eq!(
            reordered.classify("BoxUsage-DataTransfer"),
            CostCategory::DataTransfer
        );
    }

    #[test]
    fn test_custom_regex_rules() {
        let table = ClassificationTable::new(vec![ClassificationRule::new(
            CostCategory::Compute,
            r"^Fargate-(vCPU|GB)-Hours",
        )])
        .unwrap();
        assert_eq!(table.classify("Fargate-vCPU-Hours:perCPU"), CostCategory::Compute);
        assert_eq!(table.classify("BoxUsage"), CostCategory::Other);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = ClassificationTable::new(vec![
            ClassificationRule::new(CostCategory::Compute, "BoxUsage"),
            ClassificationRule::new(CostCategory::Storage, "EBS:(Volume"),
        ]);
        match result {
            Err(CostDrillError::InvalidClassificationRule { pattern, .. }) => {
                assert_eq!(pattern, "EBS:(Volume");
            }
            other => panic!("expected invalid rule error, got {:?}", other),
        }
    }

    #[test]
    fn test_default_table_matches_explicit_default_rules() {
        let explicit = ClassificationTable::new(default_rules()).unwrap();
        let implicit = ClassificationTable::default();
        for key in ["BoxUsage", "EBS:SnapshotUsage", "IdleAddress", "Other"] {
            assert_eq!(explicit.classify(key), implicit.classify(key));
        }
    }
}
