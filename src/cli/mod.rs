// Command-line argument types
pub mod args;

pub use args::{Cli, Commands, ConfigAction};
