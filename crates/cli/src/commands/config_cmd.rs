//! `ferrule config`: print the effective configuration.

use ferrule_config::AppConfig;
use std::path::Path;

pub fn run(config: &AppConfig, explicit: Option<&Path>, path_only: bool) -> anyhow::Result<()> {
    if path_only {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
        println!("{}", path.display());
        return Ok(());
    }

    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
