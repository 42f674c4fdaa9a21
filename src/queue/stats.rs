// Queue statistics - lock-free counters for admission and generation outcomes

use crate::error::Rejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatsSnapshot {
    pub submitted: u64,
    pub accepted: u64,
    pub rejected_unsafe: u64,
    pub rejected_rate_limited: u64,
    pub rejected_cooldown: u64,
    pub rejected_capacity: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Cumulative wall time spent in generators, in milliseconds
    pub total_generation_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
}

impl QueueStatsSnapshot {
    pub fn rejected(&self) -> u64 {
        self.rejected_unsafe
            + self.rejected_rate_limited
            + self.rejected_cooldown
            + self.rejected_capacity
    }

    /// Average generation time over finished requests
    pub fn avg_generation_ms(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.total_generation_ms as f64 / finished as f64
        }
    }
}

#[derive(Debug)]
pub struct QueueStats {
    submitted: AtomicU64,
    accepted: AtomicU64,
    rejected_unsafe: AtomicU64,
    rejected_rate_limited: AtomicU64,
    rejected_cooldown: AtomicU64,
    rejected_capacity: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    generation_ms_total: AtomicU64,
    started_at: DateTime<Utc>,
}

impl QueueStats {
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected_unsafe: AtomicU64::new(0),
            rejected_rate_limited: AtomicU64::new(0),
            rejected_cooldown: AtomicU64::new(0),
            rejected_capacity: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            generation_ms_total: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self, rejection: &Rejection) {
        let counter = match rejection {
            Rejection::Unsafe { .. } => &self.rejected_unsafe,
            Rejection::RateLimited { .. } => &self.rejected_rate_limited,
            Rejection::Cooldown { .. } => &self.rejected_cooldown,
            Rejection::TooManyPending { .. } | Rejection::QueueFull { .. } => {
                &self.rejected_capacity
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, elapsed: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.add_elapsed(elapsed);
    }

    pub fn record_failed(&self, elapsed: Duration, timed_out: bool) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timed_out.fetch_add(1, Ordering::Relaxed);
        }
        self.add_elapsed(elapsed);
    }

    fn add_elapsed(&self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.generation_ms_total.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_unsafe: self.rejected_unsafe.load(Ordering::Relaxed),
            rejected_rate_limited: self.rejected_rate_limited.load(Ordering::Relaxed),
            rejected_cooldown: self.rejected_cooldown.load(Ordering::Relaxed),
            rejected_capacity: self.rejected_capacity.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            total_generation_ms: self.generation_ms_total.load(Ordering::Relaxed),
            started_at: Some(self.started_at),
        }
    }
}

impl Default for QueueStats {
    fn default() -> Self {
        Self::new()
    }
}
