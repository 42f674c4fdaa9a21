// Configuration structs

use super::constants::*;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Admission and scheduling limits for the image queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Generations admitted per actor inside one rate window
    pub rate_limit_count: usize,

    /// Rate window length in seconds
    pub rate_limit_period_secs: u64,

    /// Minimum seconds between two admitted requests from one actor (0 disables)
    pub cooldown_secs: u64,

    /// Pending + active requests allowed per actor
    pub max_pending_per_actor: usize,

    /// Backlog size across all actors
    pub max_queue_size: usize,

    /// Seconds a single generation may run before it is failed
    pub generation_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            rate_limit_count: DEFAULT_RATE_LIMIT_COUNT,
            rate_limit_period_secs: DEFAULT_RATE_LIMIT_PERIOD_SECS,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            max_pending_per_actor: DEFAULT_MAX_PENDING_PER_ACTOR,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            generation_timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
        }
    }
}

impl QueueConfig {
    pub fn rate_limit_period(&self) -> Duration {
        Duration::from_secs(self.rate_limit_period_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

/// Content moderation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Terms blocked in addition to the built-in list (case-insensitive)
    pub extra_blocked_terms: Vec<String>,

    /// Marker-phrase hits needed to flag an override attempt
    pub suspicion_threshold: usize,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            extra_blocked_terms: Vec::new(),
            suspicion_threshold: DEFAULT_SUSPICION_THRESHOLD,
        }
    }
}

/// Image server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the AUTOMATIC1111-compatible API
    pub base_url: String,

    /// HTTP timeout for one request, in seconds
    pub timeout_secs: u64,

    /// Free VRAM after every generation by unloading the checkpoint
    pub unload_after_generation: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            timeout_secs: DEFAULT_BACKEND_TIMEOUT_SECS,
            unload_after_generation: true,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset (e.g. "info", "splitbot=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub moderation: ModerationConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate configuration and return helpful errors
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.rate_limit_count == 0 {
            bail!("queue.rate_limit_count must be at least 1");
        }
        if self.queue.rate_limit_period_secs == 0 {
            bail!("queue.rate_limit_period_secs must be at least 1");
        }
        if self.queue.max_pending_per_actor == 0 {
            bail!("queue.max_pending_per_actor must be at least 1");
        }
        if self.queue.max_queue_size == 0 {
            bail!("queue.max_queue_size must be at least 1");
        }
        if self.queue.generation_timeout_secs == 0 {
            bail!("queue.generation_timeout_secs must be at least 1");
        }
        if self.moderation.suspicion_threshold == 0 {
            bail!("moderation.suspicion_threshold must be at least 1");
        }
        if !(self.backend.base_url.starts_with("http://")
            || self.backend.base_url.starts_with("https://"))
        {
            bail!(
                "backend.base_url must start with http:// or https:// (got '{}')",
                self.backend.base_url
            );
        }
        Ok(())
    }
}
