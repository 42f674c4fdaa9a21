// Per-actor sliding-window rate limiting and cooldown
//
// Predicates only prune expired history; new timestamps are added by
// `record`, which the admission path calls once a request is accepted.

use crate::config::QueueConfig;
use crate::request::ActorKey;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Admission history of one actor
#[derive(Debug, Clone, Default)]
pub struct ActorRateState {
    /// Admission times inside the trailing window, oldest first
    timestamps: VecDeque<Instant>,
    /// Most recent admission, for the cooldown
    last_request: Option<Instant>,
}

impl ActorRateState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn admitted_in_window(&self) -> usize {
        self.timestamps.len()
    }

    pub fn last_request(&self) -> Option<Instant> {
        self.last_request
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    cooldown: Duration,
    actors: HashMap<ActorKey, ActorRateState>,
}

impl RateLimiter {
    /// `limit` admissions per `window`, at least `cooldown` apart
    pub fn new(limit: usize, window: Duration, cooldown: Duration) -> Self {
        Self {
            limit,
            window,
            cooldown,
            actors: HashMap::new(),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.rate_limit_count,
            config.rate_limit_period(),
            config.cooldown(),
        )
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True when the actor has used up the window
    pub fn is_rate_limited(&mut self, actor: &ActorKey, now: Instant) -> bool {
        self.usage(actor, now) >= self.limit
    }

    /// True while the minimum spacing since the last admission has not elapsed
    pub fn is_on_cooldown(&self, actor: &ActorKey, now: Instant) -> bool {
        !self.cooldown_remaining(actor, now).is_zero()
    }

    /// Admissions inside the trailing window
    pub fn usage(&mut self, actor: &ActorKey, now: Instant) -> usize {
        let window = self.window;
        match self.actors.get_mut(actor) {
            Some(state) => {
                state.prune(now, window);
                state.admitted_in_window()
            }
            None => 0,
        }
    }

    /// Time until the actor drops back under the limit (zero if already under)
    pub fn retry_after(&mut self, actor: &ActorKey, now: Instant) -> Duration {
        let (limit, window) = (self.limit, self.window);
        let Some(state) = self.actors.get_mut(actor) else {
            return Duration::ZERO;
        };
        state.prune(now, window);

        let count = state.timestamps.len();
        if count < limit {
            return Duration::ZERO;
        }
        // The (count - limit + 1) oldest entries must expire; the last of them decides
        state
            .timestamps
            .get(count - limit)
            .map(|&t| (t + window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    pub fn cooldown_remaining(&self, actor: &ActorKey, now: Instant) -> Duration {
        self.actors
            .get(actor)
            .and_then(|state| state.last_request)
            .map(|last| (last + self.cooldown).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Record an admitted request
    pub fn record(&mut self, actor: &ActorKey, now: Instant) {
        let window = self.window;
        let state = self.actors.entry(actor.clone()).or_default();
        state.prune(now, window);
        state.timestamps.push_back(now);
        state.last_request = Some(now);
    }

    /// Forget actors with no history inside the window and no running cooldown.
    /// Returns how many were dropped.
    pub fn purge_idle(&mut self, now: Instant) -> usize {
        let (window, cooldown) = (self.window, self.cooldown);
        let before = self.actors.len();
        self.actors.retain(|_, state| {
            state.prune(now, window);
            let cooling = state
                .last_request
                .map(|last| now.saturating_duration_since(last) < cooldown)
                .unwrap_or(false);
            !state.timestamps.is_empty() || cooling
        });
        before - self.actors.len()
    }

    pub fn tracked_actors(&self) -> usize {
        self.actors.len()
    }

    pub fn state(&self, actor: &ActorKey) -> Option<&ActorRateState> {
        self.actors.get(actor)
    }
}
