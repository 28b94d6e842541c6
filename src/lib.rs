// costdrill library crate
// Exposes modules for the binary and integration tests

pub mod analysis;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod facade;
pub mod fetch;
pub mod models;
pub mod query;

pub use error::{CostDrillError, Result};
pub use facade::{CostDrill, FacadeSettings};
