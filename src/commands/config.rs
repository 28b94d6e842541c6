use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::cli::ConfigAction;
use crate::config::Config;

pub fn handle_config_action(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };

    match action {
        ConfigAction::Init => {
            Config::default()
                .save_to(&path)
                .context("Failed to initialize config")?;
            print_status("success", &format!("Configuration initialized at {}", path.display()));
        }
        ConfigAction::Show => {
            let config = Config::load(Some(&path)).context("Failed to load config")?;
            let body = json!({
                "path": path.display().to_string(),
                "config": config,
                "effective_rules": config.effective_rules(),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load(Some(&path)).context("Failed to load config")?;
            config
                .set_value(&key, &value)
                .context("Invalid configuration")?;
            config.save_to(&path).context("Failed to save config")?;
            print_status("success", &format!("Configuration updated: {} = {}", key, value));
        }
    }
    Ok(())
}

pub fn print_status(status: &str, message: &str) {
    println!("{}", json!({ "status": status, "message": message }));
}

pub fn config_path(flag: Option<&str>) -> Option<PathBuf> {
    flag.map(crate::config::expand_home)
}
