// costdrill: per-resource cloud cost drill-down
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use costdrill::cli::{Cli, Commands};
use costdrill::commands::{
    CostOptions, config_path, exit_code, handle_collection_command, handle_config_action,
    handle_resource_command, handle_waste_command, print_status,
};
use costdrill::config::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        print_status("error", &format!("{:#}", e));
        std::process::exit(exit_code(&e));
    }
}

/// RUST_LOG wins; otherwise --verbose means debug and the default is warn
fn init_logging(verbose: bool) {
    let fallback = if verbose { "costdrill=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_file = config_path(cli.config.as_deref());

    if let Commands::Config { action } = cli.command {
        return handle_config_action(action, config_file.as_deref());
    }

    let config = Config::load(config_file.as_deref())?;
    tracing::debug!(?config_file, "configuration loaded");

    let options = CostOptions {
        since: cli.since,
        until: cli.until,
        billing: cli.billing,
        inventory: cli.inventory,
        no_cache: cli.no_cache,
    };

    match cli.command {
        Commands::Resource {
            id,
            baseline_since,
            baseline_until,
        } => {
            let baseline = baseline_since.zip(baseline_until);
            handle_resource_command(&config, &options, &id, baseline).await
        }
        Commands::Collection {
            region,
            resource_type,
            filters,
            top,
        } => {
            handle_collection_command(&config, &options, region, resource_type, &filters, top)
                .await
        }
        Commands::Waste {
            id,
            region,
            resource_type,
            filters,
        } => handle_waste_command(&config, &options, id, region, resource_type, &filters).await,
        Commands::Config { .. } => Ok(()),
    }
}
