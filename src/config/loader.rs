// Configuration loader
// Loads ~/.splitbot/config.toml, then applies SPLITBOT_* environment overrides

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::Config;

/// Default location of the config file
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".splitbot").join("config.toml"))
}

/// Load configuration from the default path (missing file = defaults) and the environment
pub fn load_config() -> Result<Config> {
    let path = default_config_path()?;
    load_config_from(&path)
}

/// Load configuration from an explicit path.
///
/// A missing file is not an error: every section has defaults.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str::<Config>(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    config
        .validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

/// Apply SPLITBOT_* overrides. `lookup` abstracts the environment for tests.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("SPLITBOT_RATE_LIMIT_COUNT") {
        config.queue.rate_limit_count = value
            .trim()
            .parse()
            .with_context(|| format!("SPLITBOT_RATE_LIMIT_COUNT is not a number: '{value}'"))?;
    }
    if let Some(value) = lookup("SPLITBOT_RATE_LIMIT_PERIOD") {
        config.queue.rate_limit_period_secs = value
            .trim()
            .parse()
            .with_context(|| format!("SPLITBOT_RATE_LIMIT_PERIOD is not a number: '{value}'"))?;
    }
    if let Some(value) = lookup("SPLITBOT_COOLDOWN") {
        config.queue.cooldown_secs = value
            .trim()
            .parse()
            .with_context(|| format!("SPLITBOT_COOLDOWN is not a number: '{value}'"))?;
    }
    if let Some(value) = lookup("SPLITBOT_BACKEND_URL") {
        if !value.is_empty() {
            config.backend.base_url = value.trim_end_matches('/').to_string();
        }
    }
    if let Some(value) = lookup("SPLITBOT_LOG") {
        if !value.is_empty() {
            config.logging.level = value;
        }
    }
    Ok(())
}
