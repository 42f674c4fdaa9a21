// Project-wide constants
//
// Centralised here so queue limits and other magic values have one
// source of truth. Import via `use crate::config::constants::*;`.

/// Admitted generations allowed per actor inside one rate window.
pub const DEFAULT_RATE_LIMIT_COUNT: usize = 3;

/// Length of the sliding rate window in seconds (one hour).
pub const DEFAULT_RATE_LIMIT_PERIOD_SECS: u64 = 3600;

/// Minimum spacing between two admitted requests from the same actor.
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// Requests one actor may have pending or active at the same time.
pub const DEFAULT_MAX_PENDING_PER_ACTOR: usize = 3;

/// Total backlog size across all actors.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 20;

/// Upper bound on a single generation before it is failed.
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 300;

/// Marker-phrase hits that flag a prompt as an override attempt.
pub const DEFAULT_SUSPICION_THRESHOLD: usize = 2;

/// AUTOMATIC1111-compatible image server started with `--api`.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:7860";

/// HTTP timeout for a single txt2img call.
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_WIDTH: u32 = 768;
pub const DEFAULT_HEIGHT: u32 = 768;
pub const DEFAULT_STEPS: u32 = 20;
pub const DEFAULT_GUIDANCE_SCALE: f32 = 7.5;

pub const MIN_DIMENSION: u32 = 256;
pub const MAX_DIMENSION: u32 = 1024;
pub const MAX_STEPS: u32 = 30;
pub const MIN_GUIDANCE_SCALE: f32 = 1.0;
pub const MAX_GUIDANCE_SCALE: f32 = 10.0;

/// Negative prompt applied when the caller supplies none.
pub const DEFAULT_NEGATIVE_PROMPT: &str =
    "low quality, blurry, distorted, deformed, ugly, bad anatomy";
