//! Ordered fan-out of change events to watch subscribers.
//!
//! Ordering comes from the sequencer: a mutation commits and publishes
//! while holding it, and a watch takes its snapshot and registers while
//! holding it. An event is therefore either part of a subscriber's replay
//! batch or delivered live, never both and never neither.

mod event;
mod subscription;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tracing::{debug, warn};

use crate::core::Document;

pub use event::{EventFilter, EventType, WatchEvent};
pub use subscription::Subscription;

/// Broadcaster settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcasterConfig {
    /// Per-subscriber queue length.
    pub capacity: usize,
    /// Disconnect a subscriber whose full queue does not drain within this
    /// long. `None` blocks the publisher until there is room.
    pub slow_consumer_timeout: Option<Duration>,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            slow_consumer_timeout: None,
        }
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers whose filter matched.
    pub matched: usize,
    /// Subscribers that received the event.
    pub delivered: usize,
    /// Subscribers removed because they were closed or too slow.
    pub disconnected: usize,
}

struct Subscriber {
    id: u64,
    filter: EventFilter,
    sender: mpsc::Sender<WatchEvent>,
}

pub struct WatchBroadcaster {
    config: BroadcasterConfig,
    sequencer: Mutex<()>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl WatchBroadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            config: BroadcasterConfig {
                capacity: config.capacity.max(1),
                ..config
            },
            sequencer: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    /// Exclusive ordering permit. Hold it across commit-then-publish and
    /// across snapshot-then-subscribe.
    pub async fn sequence(&self) -> Sequencer<'_> {
        Sequencer {
            broadcaster: self,
            _permit: self.sequencer.lock().await,
        }
    }

    /// Subscribe to events published from now on.
    pub async fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.sequence().await.subscribe(filter).await
    }

    /// Subscribe with a replay batch delivered before any live event.
    pub async fn subscribe_with_replay(&self, filter: EventFilter, replay: Vec<WatchEvent>) -> Subscription {
        self.sequence().await.subscribe_with_replay(filter, replay).await
    }

    pub async fn publish(&self, event_type: EventType, document: Document) -> PublishReport {
        self.sequence().await.publish(event_type, document).await
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// End every subscription. Later subscriptions end immediately and
    /// publishes reach nobody.
    pub async fn shutdown(&self) {
        let _permit = self.sequencer.lock().await;
        self.shut_down.store(true, Ordering::SeqCst);
        let dropped = std::mem::take(&mut *self.subscribers.lock().await);
        debug!(subscribers = dropped.len(), "Watch broadcaster shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    async fn register(&self, filter: EventFilter, replay: Vec<WatchEvent>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(self.config.capacity);

        if self.is_shut_down() {
            return Subscription::new(id, replay, receiver);
        }

        debug!(
            subscription = id,
            tenant = %filter.tenant,
            namespace = ?filter.namespace,
            replay = replay.len(),
            "Watch subscribed"
        );
        let mut subscribers = self.subscribers.lock().await;
        prune_closed(&mut subscribers);
        subscribers.push(Subscriber { id, filter, sender });
        Subscription::new(id, replay, receiver)
    }

    async fn deliver(&self, event: WatchEvent) -> PublishReport {
        let (pruned, targets) = {
            let mut subscribers = self.subscribers.lock().await;
            let pruned = prune_closed(&mut subscribers);
            let targets: Vec<(u64, mpsc::Sender<WatchEvent>)> = subscribers
                .iter()
                .filter(|s| s.filter.matches(&event.document))
                .map(|s| (s.id, s.sender.clone()))
                .collect();
            (pruned, targets)
        };

        let mut report = PublishReport {
            matched: targets.len(),
            disconnected: pruned,
            ..PublishReport::default()
        };
        let mut gone = Vec::new();

        for (id, sender) in targets {
            let sent = match self.config.slow_consumer_timeout {
                Some(timeout) => match sender.send_timeout(event.clone(), timeout).await {
                    Ok(()) => true,
                    Err(SendTimeoutError::Timeout(_)) => {
                        warn!(subscription = id, ?timeout, "Disconnecting slow watch consumer");
                        false
                    }
                    Err(SendTimeoutError::Closed(_)) => false,
                },
                None => sender.send(event.clone()).await.is_ok(),
            };

            if sent {
                report.delivered += 1;
            } else {
                gone.push(id);
            }
        }

        if !gone.is_empty() {
            let mut subscribers = self.subscribers.lock().await;
            let before = subscribers.len();
            subscribers.retain(|s| !gone.contains(&s.id));
            report.disconnected += before - subscribers.len();
        }

        report
    }
}

/// Drop subscribers whose subscription was closed or dropped.
fn prune_closed(subscribers: &mut Vec<Subscriber>) -> usize {
    let before = subscribers.len();
    subscribers.retain(|s| !s.sender.is_closed());
    before - subscribers.len()
}

impl Default for WatchBroadcaster {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}

/// Held ordering permit; see [`WatchBroadcaster::sequence`].
pub struct Sequencer<'a> {
    broadcaster: &'a WatchBroadcaster,
    _permit: MutexGuard<'a, ()>,
}

impl Sequencer<'_> {
    /// Deliver to every matching subscriber, in publication order. Blocks
    /// while a subscriber's queue is full.
    pub async fn publish(&self, event_type: EventType, document: Document) -> PublishReport {
        let event = WatchEvent::new(event_type, document);
        let report = self.broadcaster.deliver(event).await;
        debug!(
            event = %event_type,
            matched = report.matched,
            delivered = report.delivered,
            "Published watch event"
        );
        report
    }

    pub async fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.broadcaster.register(filter, Vec::new()).await
    }

    pub async fn subscribe_with_replay(&self, filter: EventFilter, replay: Vec<WatchEvent>) -> Subscription {
        self.broadcaster.register(filter, replay).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> Document {
        let mut doc = Document::new(name).with_namespace("default");
        doc.metadata.tenant = "cluster-a".into();
        doc
    }

    fn filter() -> EventFilter {
        EventFilter::new("cluster-a")
    }

    #[tokio::test]
    async fn test_events_arrive_in_publication_order() {
        let broadcaster = WatchBroadcaster::default();
        let mut sub = broadcaster.subscribe(filter()).await;

        broadcaster.publish(EventType::Added, doc("a")).await;
        broadcaster.publish(EventType::Modified, doc("a")).await;
        broadcaster.publish(EventType::Deleted, doc("a")).await;

        let types: Vec<EventType> = (0..3).map(|_| sub.try_recv().unwrap().event_type).collect();
        assert_eq!(types, vec![EventType::Added, EventType::Modified, EventType::Deleted]);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_replay_precedes_live_events() {
        let broadcaster = WatchBroadcaster::default();
        let replay = vec![WatchEvent::new(EventType::Added, doc("old"))];
        let mut sub = broadcaster.subscribe_with_replay(filter(), replay).await;

        broadcaster.publish(EventType::Added, doc("new")).await;

        assert_eq!(sub.recv().await.unwrap().document.name(), "old");
        assert_eq!(sub.recv().await.unwrap().document.name(), "new");
    }

    #[tokio::test]
    async fn test_non_matching_subscriber_is_skipped() {
        let broadcaster = WatchBroadcaster::default();
        let mut other = broadcaster.subscribe(EventFilter::new("cluster-b")).await;

        let report = broadcaster.publish(EventType::Added, doc("a")).await;
        assert_eq!(report.matched, 0);
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_closed_subscription_is_pruned() {
        let broadcaster = WatchBroadcaster::default();
        let mut sub = broadcaster.subscribe(filter()).await;
        sub.close();

        let report = broadcaster.publish(EventType::Added, doc("a")).await;
        assert_eq!(report.disconnected, 1);
        assert_eq!(broadcaster.subscriber_count().await, 0);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscriptions_are_released_without_matching_events() {
        let broadcaster = WatchBroadcaster::default();
        for _ in 0..100 {
            drop(broadcaster.subscribe(EventFilter::new("quiet-tenant")).await);
        }
        let mut closed = broadcaster.subscribe(EventFilter::new("quiet-tenant")).await;
        closed.close();

        for i in 0..10 {
            let mut doc = Document::new(format!("busy-{}", i));
            doc.metadata.tenant = "busy".into();
            broadcaster.publish(EventType::Added, doc).await;
        }
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_releases_dropped_subscriptions() {
        let broadcaster = WatchBroadcaster::default();
        drop(broadcaster.subscribe(EventFilter::new("quiet-tenant")).await);
        drop(broadcaster.subscribe(EventFilter::new("quiet-tenant")).await);

        let _live = broadcaster.subscribe(filter()).await;
        assert_eq!(broadcaster.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_disconnected() {
        let broadcaster = WatchBroadcaster::new(BroadcasterConfig {
            capacity: 1,
            slow_consumer_timeout: Some(Duration::from_millis(10)),
        });
        let mut slow = broadcaster.subscribe(filter()).await;

        assert_eq!(broadcaster.publish(EventType::Added, doc("a")).await.delivered, 1);
        let report = broadcaster.publish(EventType::Added, doc("b")).await;
        assert_eq!(report.disconnected, 1);

        assert_eq!(slow.recv().await.unwrap().document.name(), "a");
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_blocks_publisher_until_drained() {
        let broadcaster = std::sync::Arc::new(WatchBroadcaster::new(BroadcasterConfig {
            capacity: 1,
            slow_consumer_timeout: None,
        }));
        let mut sub = broadcaster.subscribe(filter()).await;
        broadcaster.publish(EventType::Added, doc("a")).await;

        let publisher = {
            let broadcaster = broadcaster.clone();
            tokio::spawn(async move { broadcaster.publish(EventType::Added, doc("b")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!publisher.is_finished());

        assert_eq!(sub.recv().await.unwrap().document.name(), "a");
        assert_eq!(publisher.await.unwrap().delivered, 1);
        assert_eq!(sub.recv().await.unwrap().document.name(), "b");
    }

    #[tokio::test]
    async fn test_shutdown_ends_streams() {
        use futures::StreamExt;

        let broadcaster = WatchBroadcaster::default();
        let mut sub = broadcaster.subscribe(filter()).await;
        broadcaster.publish(EventType::Added, doc("a")).await;
        broadcaster.shutdown().await;

        let remaining: Vec<WatchEvent> = (&mut sub).collect().await;
        assert_eq!(remaining.len(), 1);

        let mut late = broadcaster.subscribe(filter()).await;
        assert!(late.recv().await.is_none());
        assert_eq!(broadcaster.publish(EventType::Added, doc("b")).await.matched, 0);
    }
}
