// Tracing subscriber setup
//
// RUST_LOG wins when set; otherwise the configured level is used.
// `log` records from dependencies are forwarded into tracing.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. Safe to call once per process.
pub fn init(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .with_context(|| format!("Invalid log filter: '{default_level}'"))?;

    tracing_log::LogTracer::init().context("Failed to bridge log records into tracing")?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
