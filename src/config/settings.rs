use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::analysis::{
    default_rules, ClassificationRule, ClassificationTable, DEFAULT_HIGH_TRANSFER_FRACTION,
};
use crate::facade::FacadeSettings;
use crate::models::Granularity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub cache: CacheConfig,
    pub query: QueryConfig,
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub collection_ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    pub default_days: u32,
    pub region: String,
    pub currency: String,
    #[serde(default = "default_granularity")]
    pub granularity: Granularity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub high_transfer_fraction: Decimal,
    pub top_n: usize,
}

/// Custom rule table; empty means the built-in one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default)]
    pub rules: Vec<ClassificationRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    pub max_throttle_retries: u32,
    pub billing_snapshot: String,
    pub inventory_snapshot: String,
}

fn default_granularity() -> Granularity {
    Granularity::Daily
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig {
                enabled: true,
                ttl_seconds: 3600,
                collection_ttl_seconds: 1800,
            },
            query: QueryConfig {
                default_days: 30,
                region: "us-east-1".to_string(),
                currency: "USD".to_string(),
                granularity: Granularity::Daily,
            },
            analysis: AnalysisConfig {
                high_transfer_fraction: DEFAULT_HIGH_TRANSFER_FRACTION,
                top_n: 10,
            },
            classification: ClassificationConfig::default(),
            fetch: FetchConfig {
                max_throttle_retries: 2,
                billing_snapshot: "~/.config/costdrill/billing.json".to_string(),
                inventory_snapshot: "~/.config/costdrill/inventory.json".to_string(),
            },
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`
    ///
    /// A missing file is created with commented defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let contents = self.to_commented_toml()?;

        fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// TOML with a comment above every option
    pub fn to_commented_toml(&self) -> Result<String> {
        let mut output = String::new();

        output.push_str("# costdrill configuration\n");
        output.push_str("# Command-line flags override these values.\n");
        output.push('\n');

        output.push_str("[cache]\n");
        output.push_str("# Cache query results in memory for the life of the process\n");
        output.push_str(&format!("enabled = {}\n", self.cache.enabled));
        output.push_str("# Lifetime of a single-resource breakdown, in seconds\n");
        output.push_str(&format!("ttl_seconds = {}\n", self.cache.ttl_seconds));
        output.push_str("# Lifetime of a collection summary, in seconds\n");
        output.push_str(&format!(
            "collection_ttl_seconds = {}\n",
            self.cache.collection_ttl_seconds
        ));
        output.push('\n');

        output.push_str("[query]\n");
        output.push_str("# Range used when --since is not given, ending today\n");
        output.push_str(&format!("default_days = {}\n", self.query.default_days));
        output.push_str("# Region used by collection queries when --region is not given\n");
        output.push_str(&format!("region = \"{}\"\n", self.query.region));
        output.push_str("# Currency all amounts must be billed in\n");
        output.push_str(&format!("currency = \"{}\"\n", self.query.currency));
        output.push_str("# Time series bucket size: \"DAILY\" or \"MONTHLY\"\n");
        output.push_str(&format!("granularity = \"{}\"\n", self.query.granularity));
        output.push('\n');

        output.push_str("[analysis]\n");
        output.push_str("# Data transfer above this share of total cost is flagged (0.0 - 1.0)\n");
        output.push_str(&format!(
            "high_transfer_fraction = \"{}\"\n",
            self.analysis.high_transfer_fraction
        ));
        output.push_str("# Rows shown by `collection --top` when no count is given\n");
        output.push_str(&format!("top_n = {}\n", self.analysis.top_n));
        output.push('\n');

        output.push_str("[classification]\n");
        output.push_str("# Ordered usage-type rules; the first matching pattern wins.\n");
        output.push_str("# Leave empty to use the built-in table. Example:\n");
        output.push_str("# rules = [{ category = \"compute\", pattern = \"^Fargate\" }]\n");
        let rules: Vec<String> = self
            .classification
            .rules
            .iter()
            .map(|rule| {
                format!(
                    "  {{ category = \"{}\", pattern = {} }},\n",
                    rule.category,
                    toml::Value::String(rule.pattern.clone())
                )
            })
            .collect();
        if rules.is_empty() {
            output.push_str("rules = []\n");
        } else {
            output.push_str("rules = [\n");
            output.push_str(&rules.concat());
            output.push_str("]\n");
        }
        output.push('\n');

        output.push_str("[fetch]\n");
        output.push_str("# How often a throttled request is retried before giving up\n");
        output.push_str(&format!(
            "max_throttle_retries = {}\n",
            self.fetch.max_throttle_retries
        ));
        output.push_str("# Cost Explorer GetCostAndUsage response used as the billing source\n");
        output.push_str(&format!("billing_snapshot = \"{}\"\n", self.fetch.billing_snapshot));
        output.push_str("# JSON array of resource metadata used as the inventory source\n");
        output.push_str(&format!(
            "inventory_snapshot = \"{}\"\n",
            self.fetch.inventory_snapshot
        ));

        Ok(output)
    }

    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to determine home directory")?;
        Ok(home.join(".config").join("costdrill").join("config.toml"))
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "cache.enabled" => {
                self.cache.enabled = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "cache.ttl_seconds" => {
                self.cache.ttl_seconds = value
                    .parse()
                    .with_context(|| format!("Invalid TTL value: {}", value))?;
            }
            "cache.collection_ttl_seconds" => {
                self.cache.collection_ttl_seconds = value
                    .parse()
                    .with_context(|| format!("Invalid TTL value: {}", value))?;
            }
            "query.default_days" => {
                let days: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid day count: {}", value))?;
                if days == 0 {
                    anyhow::bail!("default_days must be at least 1");
                }
                self.query.default_days = days;
            }
            "query.region" => {
                if value.trim().is_empty() {
                    anyhow::bail!("Region must not be empty");
                }
                self.query.region = value.trim().to_string();
            }
            "query.currency" => {
                if value.len() != 3 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
                    anyhow::bail!("Invalid currency code: {}. Expected three letters", value);
                }
                self.query.currency = value.to_uppercase();
            }
            "query.granularity" => {
                self.query.granularity = Granularity::parse(value)?;
            }
            "analysis.high_transfer_fraction" => {
                let fraction = Decimal::from_str(value)
                    .with_context(|| format!("Invalid fraction: {}", value))?;
                if fraction < Decimal::ZERO || fraction > Decimal::ONE {
                    anyhow::bail!("high_transfer_fraction must be between 0 and 1");
                }
                self.analysis.high_transfer_fraction = fraction;
            }
            "analysis.top_n" => {
                self.analysis.top_n = value
                    .parse()
                    .with_context(|| format!("Invalid count: {}", value))?;
            }
            "fetch.max_throttle_retries" => {
                let retries: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid retry count: {}", value))?;
                if retries > 10 {
                    anyhow::bail!("max_throttle_retries must be between 0 and 10");
                }
                self.fetch.max_throttle_retries = retries;
            }
            "fetch.billing_snapshot" => self.fetch.billing_snapshot = value.to_string(),
            "fetch.inventory_snapshot" => self.fetch.inventory_snapshot = value.to_string(),
            _ => anyhow::bail!("Unknown configuration key: {}", key),
        }
        Ok(())
    }

    /// Compile the configured rule table, falling back to the built-in rules
    pub fn classification_table(&self) -> Result<ClassificationTable> {
        if self.classification.rules.is_empty() {
            return Ok(ClassificationTable::default());
        }
        ClassificationTable::new(self.classification.rules.clone())
            .context("Invalid [classification] rules")
    }

    pub fn facade_settings(&self) -> FacadeSettings {
        FacadeSettings {
            cache_enabled: self.cache.enabled,
            breakdown_ttl: seconds(self.cache.ttl_seconds),
            collection_ttl: seconds(self.cache.collection_ttl_seconds),
            granularity: self.query.granularity,
            currency: self.query.currency.clone(),
            high_transfer_fraction: self.analysis.high_transfer_fraction,
        }
    }

    /// Rules in effect, for display
    pub fn effective_rules(&self) -> Vec<ClassificationRule> {
        if self.classification.rules.is_empty() {
            default_rules()
        } else {
            self.classification.rules.clone()
        }
    }
}

fn seconds(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
