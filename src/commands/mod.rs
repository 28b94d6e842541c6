// Command handlers module
pub mod config;
pub mod costs;

pub use config::{config_path, handle_config_action, print_status};
pub use costs::{
    exit_code, handle_collection_command, handle_resource_command, handle_waste_command,
    CostOptions,
};
