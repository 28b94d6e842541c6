use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "costdrill")]
#[command(about = "Cloud cost drill-down by resource and region")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Start date (YYYY-MM-DD), inclusive
    #[arg(long, global = true)]
    pub since: Option<String>,

    /// End date (YYYY-MM-DD), exclusive
    #[arg(long, global = true)]
    pub until: Option<String>,

    /// Billing snapshot file (Cost Explorer response)
    #[arg(long, global = true)]
    pub billing: Option<String>,

    /// Inventory snapshot file (JSON array of resources)
    #[arg(long, global = true)]
    pub inventory: Option<String>,

    /// Bypass the in-process result cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize fresh configuration
    Init,
    /// Set configuration value
    Set {
        /// Configuration key (e.g., cache.ttl_seconds)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[derive(Subcommand)]
pub enum Commands {
    /// Cost breakdown of one resource
    Resource {
        /// Resource id (e.g., i-0abc123)
        id: String,

        /// Compare against a baseline range starting at this date
        #[arg(long, requires = "baseline_until")]
        baseline_since: Option<String>,

        /// End of the baseline range (exclusive)
        #[arg(long, requires = "baseline_since")]
        baseline_until: Option<String>,
    },

    /// Cost of every resource in a region
    Collection {
        /// Region (defaults to query.region from config)
        #[arg(long)]
        region: Option<String>,

        /// Only resources of this type
        #[arg(long = "type")]
        resource_type: Option<String>,

        /// Filter expressions: state=running, type=t3.large, tag:env=prod, tag:env
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Show only the N most expensive resources
        #[arg(long, num_args = 0..=1, default_missing_value = "0")]
        top: Option<usize>,
    },

    /// Resources with likely waste, most expensive first
    Waste {
        /// Single resource to analyze instead of a region
        #[arg(long, conflicts_with_all = ["region", "resource_type", "filters"])]
        id: Option<String>,

        /// Region (defaults to query.region from config)
        #[arg(long)]
        region: Option<String>,

        /// Only resources of this type
        #[arg(long = "type")]
        resource_type: Option<String>,

        /// Filter expressions, as for `collection`
        #[arg(long = "filter")]
        filters: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}
