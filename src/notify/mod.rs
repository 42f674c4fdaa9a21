// Per-actor status notifications
//
// Publishing is a synchronous channel send, so events reach each actor in
// the order the queue produced them. A single dispatcher task invokes the
// registered sinks; sink errors, panics and timeouts are logged there and
// never reach the queue or the worker.

use crate::request::ActorKey;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Upper bound on one sink delivery
const SINK_TIMEOUT: Duration = Duration::from_secs(10);

/// Progress of a queued request, as shown to its submitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Admitted; `position` requests are ahead of it (0 = next to run)
    Queued { position: usize },
    Started,
    Complete,
    Failed { reason: String },
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::Queued { position: 0 } => {
                write!(f, "Your image request is next in line.")
            }
            StatusEvent::Queued { position } => write!(
                f,
                "Your request is queued at position {position}. I'll notify you when it starts."
            ),
            StatusEvent::Started => write!(f, "Generating image now. This may take a minute..."),
            StatusEvent::Complete => write!(f, "Your image is ready!"),
            StatusEvent::Failed { reason } => write!(f, "Image generation failed: {reason}"),
        }
    }
}

/// Receiver of status events for one actor
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn notify(&self, event: &StatusEvent) -> Result<()>;
}

/// Forwards events into an unbounded channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<StatusEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StatusSink for ChannelSink {
    async fn notify(&self, event: &StatusEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("status receiver dropped"))
    }
}

/// Adapts an async closure taking the rendered message text
pub struct FnSink<F> {
    f: F,
}

impl<F, Fut> FnSink<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> StatusSink for FnSink<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn notify(&self, event: &StatusEvent) -> Result<()> {
        (self.f)(event.to_string()).await
    }
}

type SinkMap = DashMap<ActorKey, Arc<dyn StatusSink>>;

/// Actor → sink registry with ordered, fire-and-forget delivery
#[derive(Clone)]
pub struct StatusNotifier {
    sinks: Arc<SinkMap>,
    tx: mpsc::UnboundedSender<(ActorKey, StatusEvent)>,
}

impl StatusNotifier {
    /// Create the registry and spawn its dispatcher. Must run inside a Tokio runtime.
    pub fn new() -> Self {
        let sinks: Arc<SinkMap> = Arc::new(DashMap::new());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(rx, Arc::clone(&sinks)));
        Self { sinks, tx }
    }

    /// Register (or replace) the sink for an actor
    pub fn register(&self, actor: ActorKey, sink: Arc<dyn StatusSink>) {
        if self.sinks.insert(actor.clone(), sink).is_some() {
            debug!(actor = %actor, "Replaced status sink");
        }
    }

    pub fn has_sink(&self, actor: &ActorKey) -> bool {
        self.sinks.contains_key(actor)
    }

    pub fn registered(&self) -> usize {
        self.sinks.len()
    }

    /// Queue an event for delivery. Never blocks and never fails.
    pub fn publish(&self, actor: &ActorKey, event: StatusEvent) {
        if self.tx.send((actor.clone(), event)).is_err() {
            debug!(actor = %actor, "Status dispatcher stopped; event dropped");
        }
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<(ActorKey, StatusEvent)>, sinks: Arc<SinkMap>) {
    while let Some((actor, event)) = rx.recv().await {
        // Clone the Arc out so no map shard lock is held across the await
        let sink = sinks.get(&actor).map(|entry| Arc::clone(entry.value()));
        let Some(sink) = sink else {
            continue;
        };

        let delivery = AssertUnwindSafe(sink.notify(&event)).catch_unwind();
        match tokio::time::timeout(SINK_TIMEOUT, delivery).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                warn!(actor = %actor, error = %e, "Status notification failed");
            }
            Ok(Err(_)) => {
                warn!(actor = %actor, "Status sink panicked");
            }
            Err(_) => {
                warn!(actor = %actor, "Status notification timed out");
            }
        }
    }
    debug!("Status dispatcher finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_messages() {
        assert!(StatusEvent::Queued { position: 3 }
            .to_string()
            .contains("position 3"));
        assert!(StatusEvent::Queued { position: 0 }
            .to_string()
            .contains("next in line"));
        assert!(StatusEvent::Started.to_string().contains("Generating"));
        assert!(StatusEvent::Failed {
            reason: "out of memory".to_string()
        }
        .to_string()
        .contains("out of memory"));
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let notifier = StatusNotifier::new();
        let actor = ActorKey::new("alice");
        let (sink, mut rx) = ChannelSink::pair();
        notifier.register(actor.clone(), Arc::new(sink));

        notifier.publish(&actor, StatusEvent::Queued { position: 1 });
        notifier.publish(&actor, StatusEvent::Started);
        notifier.publish(&actor, StatusEvent::Complete);

        assert_eq!(rx.recv().await, Some(StatusEvent::Queued { position: 1 }));
        assert_eq!(rx.recv().await, Some(StatusEvent::Started));
        assert_eq!(rx.recv().await, Some(StatusEvent::Complete));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let notifier = StatusNotifier::new();
        let actor = ActorKey::new("alice");
        let (old_sink, mut old_rx) = ChannelSink::pair();
        let (new_sink, mut new_rx) = ChannelSink::pair();

        notifier.register(actor.clone(), Arc::new(old_sink));
        notifier.register(actor.clone(), Arc::new(new_sink));
        assert_eq!(notifier.registered(), 1);

        notifier.publish(&actor, StatusEvent::Started);
        assert_eq!(new_rx.recv().await, Some(StatusEvent::Started));
        // Old sink was dropped from the registry, so its channel closes empty
        assert_eq!(old_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_unregistered_actor_is_noop() {
        let notifier = StatusNotifier::new();
        let actor = ActorKey::new("ghost");
        assert!(!notifier.has_sink(&actor));
        notifier.publish(&actor, StatusEvent::Started);
    }

    struct FailingSink;

    #[async_trait]
    impl StatusSink for FailingSink {
        async fn notify(&self, _event: &StatusEvent) -> Result<()> {
            anyhow::bail!("discord channel deleted")
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl StatusSink for PanickingSink {
        async fn notify(&self, _event: &StatusEvent) -> Result<()> {
            panic!("sink bug")
        }
    }

    #[tokio::test]
    async fn test_failing_and_panicking_sinks_do_not_stop_dispatch() {
        let notifier = StatusNotifier::new();
        let bad = ActorKey::new("bad");
        let worse = ActorKey::new("worse");
        let good = ActorKey::new("good");
        let (sink, mut rx) = ChannelSink::pair();

        notifier.register(bad.clone(), Arc::new(FailingSink));
        notifier.register(worse.clone(), Arc::new(PanickingSink));
        notifier.register(good.clone(), Arc::new(sink));

        notifier.publish(&bad, StatusEvent::Started);
        notifier.publish(&worse, StatusEvent::Started);
        notifier.publish(&good, StatusEvent::Complete);

        assert_eq!(rx.recv().await, Some(StatusEvent::Complete));
    }

    #[tokio::test]
    async fn test_fn_sink_receives_rendered_text() {
        let notifier = StatusNotifier::new();
        let actor = ActorKey::new("alice");
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        notifier.register(
            actor.clone(),
            Arc::new(FnSink::new(move |message: String| {
                let tx = tx.clone();
                async move {
                    tx.send(message)?;
                    Ok(())
                }
            })),
        );

        notifier.publish(&actor, StatusEvent::Queued { position: 2 });
        let message = rx.recv().await.unwrap();
        assert!(message.contains("position 2"));
    }
}
