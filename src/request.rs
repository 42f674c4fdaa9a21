// Image generation request types
//
// A request carries its own generator operation; the queue never knows
// which backend produces the bytes. The outcome comes back once, over a
// one-shot channel held by the caller's ticket.

use crate::config::constants::*;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Stable identity of the caller (e.g. "guild:channel:user")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorKey(String);

impl ActorKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ActorKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Request lifecycle
///
/// Pending → Active → {Complete, Failed}; Pending → Rejected at submit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Active,
    Complete,
    Failed,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Complete | RequestStatus::Failed | RequestStatus::Rejected
        )
    }
}

/// Numeric generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f32,
}

impl GenerationParams {
    /// Defaults for everything but the prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
        }
    }

    /// Bring user-supplied values into the range the GPU can handle.
    ///
    /// Dimensions land in [256, 1024] on a multiple of 8, steps in [1, 30],
    /// guidance in [1.0, 10.0]. A non-finite guidance falls back to the default.
    pub fn clamped(mut self) -> Self {
        self.width = clamp_dimension(self.width);
        self.height = clamp_dimension(self.height);
        self.steps = self.steps.clamp(1, MAX_STEPS);
        self.guidance_scale = if self.guidance_scale.is_finite() {
            self.guidance_scale
                .clamp(MIN_GUIDANCE_SCALE, MAX_GUIDANCE_SCALE)
        } else {
            DEFAULT_GUIDANCE_SCALE
        };
        self.negative_prompt = self
            .negative_prompt
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self
    }

    /// Caller's negative prompt, or the stock quality one
    pub fn effective_negative_prompt(&self) -> &str {
        self.negative_prompt
            .as_deref()
            .unwrap_or(DEFAULT_NEGATIVE_PROMPT)
    }
}

fn clamp_dimension(value: u32) -> u32 {
    let clamped = value.clamp(MIN_DIMENSION, MAX_DIMENSION);
    clamped - clamped % 8
}

/// Opaque generator: acquires the backend, produces image bytes, releases it
pub type Generator = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Vec<u8>>> + Send>;

/// Result delivered to the submitter exactly once
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Complete(Vec<u8>),
    Failed(String),
}

impl GenerationOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, GenerationOutcome::Complete(_))
    }

    pub fn into_result(self) -> anyhow::Result<Vec<u8>> {
        match self {
            GenerationOutcome::Complete(bytes) => Ok(bytes),
            GenerationOutcome::Failed(reason) => Err(anyhow::anyhow!(reason)),
        }
    }
}

/// One unit of work for the queue
pub struct GenerationRequest {
    pub id: Uuid,
    pub actor: ActorKey,
    pub params: GenerationParams,
    pub submitted_at: DateTime<Utc>,
    pub status: RequestStatus,
    generator: Option<Generator>,
}

impl GenerationRequest {
    pub fn new<F, Fut>(actor: impl Into<ActorKey>, params: GenerationParams, generator: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            actor: actor.into(),
            params,
            submitted_at: Utc::now(),
            status: RequestStatus::Pending,
            generator: Some(Box::new(move || generator().boxed())),
        }
    }

    pub fn prompt(&self) -> &str {
        &self.params.prompt
    }

    /// The generator runs at most once; later calls get `None`
    pub(crate) fn take_generator(&mut self) -> Option<Generator> {
        self.generator.take()
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("id", &self.id)
            .field("actor", &self.actor)
            .field("params", &self.params)
            .field("submitted_at", &self.submitted_at)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Handle returned on admission; resolves when the request finishes
#[derive(Debug)]
pub struct GenerationTicket {
    pub id: Uuid,
    rx: oneshot::Receiver<GenerationOutcome>,
}

impl GenerationTicket {
    pub(crate) fn new(id: Uuid, rx: oneshot::Receiver<GenerationOutcome>) -> Self {
        Self { id, rx }
    }

    /// Wait for the outcome. A dropped queue reports as a failure.
    pub async fn outcome(self) -> GenerationOutcome {
        self.rx.await.unwrap_or_else(|_| {
            GenerationOutcome::Failed("image queue shut down before the request finished".to_string())
        })
    }
}
