use anyhow::Result;
use colored::Colorize;
use request_insights::config;
use std::path::Path;
use tracing::info;

/// Execute the config show command
///
/// Prints the effective configuration (file plus environment overrides)
pub fn show(path: &Path) -> Result<()> {
    info!(path = %path.display(), "Loading configuration for display");

    let cfg = config::load_config_from(path)?;

    println!("{}", "Effective Configuration:".green().bold());
    println!();
    println!("{}", toml::to_string_pretty(&cfg)?);

    Ok(())
}
