// Image generation queue: admission control, FIFO backlog and the single worker

mod admission;
mod rate_limit;
mod stats;
mod worker;

pub use admission::{Admission, ImageQueue, JobSummary, QueueSnapshot};
pub use rate_limit::{ActorRateState, RateLimiter};
pub use stats::{QueueStats, QueueStatsSnapshot};
