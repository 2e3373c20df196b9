pub mod config_cmd;
pub mod memory;
pub mod run;
pub mod tools;

use anyhow::Context;
use ferrule_config::AppConfig;
use std::path::Path;

/// Load `path` (or the default location) with environment overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.context("Failed to load configuration")
}
