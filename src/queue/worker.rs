// Generation worker - the single consumer of the image queue

use super::admission::{JobSummary, QueueShared, QueuedJob};
use crate::error::format_wait;
use crate::notify::StatusEvent;
use crate::request::{GenerationOutcome, RequestStatus};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Start a worker loop. Callers set `worker_running` under the state lock
/// before spawning, so at most one loop exists at a time.
pub(crate) fn spawn(shared: Arc<QueueShared>) {
    tokio::spawn(run(shared));
}

/// Clears the running flag if the loop is torn down without reaching its
/// normal exit, so the next submit starts a fresh worker.
struct RunningGuard {
    shared: Arc<QueueShared>,
    armed: bool,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.lock_state();
        state.worker_running = false;
        state.active = None;
        warn!(
            pending = state.pending.len(),
            "Image worker stopped unexpectedly; next submission restarts it"
        );
    }
}

async fn run(shared: Arc<QueueShared>) {
    let mut guard = RunningGuard {
        shared: Arc::clone(&shared),
        armed: true,
    };
    debug!("Image worker started");

    loop {
        let job = {
            let mut state = shared.lock_state();
            state.active = None;
            match state.pending.pop_front() {
                Some(mut job) => {
                    job.request.status = RequestStatus::Active;
                    state.active = Some(JobSummary::of(&job.request));
                    shared
                        .notifier
                        .publish(&job.request.actor, StatusEvent::Started);
                    job
                }
                None => {
                    // Same critical section as the emptiness check: a submit
                    // either landed before this and was popped, or sees the
                    // flag cleared and spawns a new worker.
                    state.worker_running = false;
                    guard.armed = false;
                    break;
                }
            }
        };

        process(&shared, job).await;
    }

    debug!("Image worker idle; stopping");
}

struct Failure {
    reason: String,
    timed_out: bool,
}

impl Failure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            timed_out: false,
        }
    }
}

async fn process(shared: &QueueShared, job: QueuedJob) {
    let QueuedJob { mut request, reply } = job;
    let timeout = shared.limits.generation_timeout;
    let started = Instant::now();

    info!(
        actor = %request.actor,
        request_id = %request.id,
        "Generating image"
    );

    let result = match request.take_generator() {
        Some(generator) => {
            // The generator call itself happens inside the future so a
            // synchronous panic is caught too
            let attempt = AssertUnwindSafe(async move { generator().await }).catch_unwind();
            match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(Ok(bytes))) if !bytes.is_empty() => Ok(bytes),
                Ok(Ok(Ok(_))) => Err(Failure::new("backend returned an empty image")),
                Ok(Ok(Err(e))) => Err(Failure::new(format!("{e:#}"))),
                Ok(Err(panic)) => {
                    error!(
                        request_id = %request.id,
                        panic = panic_message(panic.as_ref()),
                        "Image generator panicked"
                    );
                    Err(Failure::new("internal error while generating the image"))
                }
                Err(_) => Err(Failure {
                    reason: format!("timed out after {}", format_wait(timeout)),
                    timed_out: true,
                }),
            }
        }
        None => Err(Failure::new("request has no generator")),
    };

    let elapsed = started.elapsed();
    let (outcome, event) = match result {
        Ok(bytes) => {
            request.status = RequestStatus::Complete;
            shared.stats.record_completed(elapsed);
            info!(
                actor = %request.actor,
                request_id = %request.id,
                bytes = bytes.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Image generation complete"
            );
            (GenerationOutcome::Complete(bytes), StatusEvent::Complete)
        }
        Err(failure) => {
            request.status = RequestStatus::Failed;
            shared.stats.record_failed(elapsed, failure.timed_out);
            error!(
                actor = %request.actor,
                request_id = %request.id,
                error = %failure.reason,
                "Image generation failed"
            );
            let event = StatusEvent::Failed {
                reason: failure.reason.clone(),
            };
            (GenerationOutcome::Failed(failure.reason), event)
        }
    };

    if reply.send(outcome).is_err() {
        debug!(request_id = %request.id, "Ticket dropped before the outcome arrived");
    }
    shared.notifier.publish(&request.actor, event);
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
