//! Topic-scoped event fan-out
//!
//! In-memory hub routing published events to the connections subscribed to a
//! topic at the moment of the call. Delivery is best-effort and at-most-once
//! per subscriber per publish; a viewer that reconnects re-syncs through the
//! pull endpoints instead of replaying missed events.
//!
//! Each subscriber owns a bounded outbox that drops its oldest buffered
//! events on overflow, so one slow or stalled connection never blocks the
//! publisher or its neighbors. Publishing iterates a snapshot of the
//! subscriber set; subscribe/unsubscribe never lock out publishers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, warn};

use crate::models::{EventEnvelope, SubscriptionId, Topic};

/// Subscribe/unsubscribe notifications, consumed by the viewer counter
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Subscribed {
        topic: Topic,
        subscription_id: SubscriptionId,
    },
    Unsubscribed {
        topic: Topic,
        subscription_id: SubscriptionId,
    },
}

/// Handle binding one connection to one topic. Dropping the paired
/// `EventStream` closes the subscription; calling `unsubscribe` removes it
/// synchronously.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: Topic,
}

struct Outbox {
    queue: Mutex<VecDeque<EventEnvelope>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push an event, evicting the oldest buffered event on overflow.
    /// Returns false if the receiving side is gone.
    fn push(&self, event: EventEnvelope) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // notify_one leaves a permit even when the consumer has not
        // registered yet; notify_waiters would lose that race.
        self.notify.notify_one();
    }
}

/// Receiving half of a subscription, held by the connection task
pub struct EventStream {
    outbox: Arc<Outbox>,
}

impl EventStream {
    /// Next buffered event, or None once the subscription is closed and the
    /// buffer is drained.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            // Register for wakeup before checking the queue so a push
            // between check and await cannot be missed.
            let notified = self.outbox.notify.notified();
            if let Some(event) = self.outbox.queue.lock().pop_front() {
                return Some(event);
            }
            if self.outbox.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Non-blocking variant of `recv`
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.outbox.queue.lock().pop_front()
    }

    /// Events evicted from this subscriber's buffer since subscribing
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.outbox.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.outbox.close();
    }
}

struct SubscriberEntry {
    id: SubscriptionId,
    outbox: Arc<Outbox>,
}

/// In-memory hub for routing events to subscribed connections
pub struct FanoutHub {
    /// Map of topic -> subscriber list
    topics: DashMap<Topic, Vec<SubscriberEntry>>,
    /// Map of subscription id -> topic, for cleanup
    subscriptions: DashMap<SubscriptionId, Topic>,
    events_tx: broadcast::Sender<SubscriptionEvent>,
    outbox_capacity: usize,
}

impl FanoutHub {
    #[must_use]
    pub fn new(outbox_capacity: usize, subscription_events_capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(subscription_events_capacity);
        Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            events_tx,
            outbox_capacity,
        }
    }

    /// Receiver for subscribe/unsubscribe notifications. Consumers that fall
    /// behind observe `Lagged` and continue.
    #[must_use]
    pub fn subscription_events(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.events_tx.subscribe()
    }

    /// Register interest in a topic. Never blocks; works whether or not the
    /// topic currently has a producer.
    #[must_use]
    pub fn subscribe(&self, topic: Topic) -> (Subscription, EventStream) {
        let subscription = Subscription {
            id: SubscriptionId::new(),
            topic: topic.clone(),
        };
        let outbox = Arc::new(Outbox::new(self.outbox_capacity));

        self.topics.entry(topic.clone()).or_default().push(SubscriberEntry {
            id: subscription.id.clone(),
            outbox: Arc::clone(&outbox),
        });
        self.subscriptions
            .insert(subscription.id.clone(), topic.clone());

        debug!(
            topic = %topic,
            subscription_id = %subscription.id,
            "Subscribed"
        );
        let _ = self.events_tx.send(SubscriptionEvent::Subscribed {
            topic,
            subscription_id: subscription.id.clone(),
        });

        (subscription, EventStream { outbox })
    }

    /// Remove a subscription. Idempotent; safe to call after the connection
    /// already closed.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.unsubscribe_by_id(&subscription.id);
    }

    fn unsubscribe_by_id(&self, subscription_id: &SubscriptionId) {
        let Some((_, topic)) = self.subscriptions.remove(subscription_id) else {
            return;
        };

        if let Some(mut subscribers) = self.topics.get_mut(&topic) {
            if let Some(index) = subscribers.iter().position(|s| s.id == *subscription_id) {
                let entry = subscribers.swap_remove(index);
                entry.outbox.close();
            }
            if subscribers.is_empty() {
                drop(subscribers);
                self.topics.remove_if(&topic, |_, subs| subs.is_empty());
                debug!(topic = %topic, "Topic has no more subscribers, removed");
            }
        }

        debug!(
            topic = %topic,
            subscription_id = %subscription_id,
            "Unsubscribed"
        );
        let _ = self.events_tx.send(SubscriptionEvent::Unsubscribed {
            topic,
            subscription_id: subscription_id.clone(),
        });
    }

    /// Deliver an event to every connection subscribed to `topic` at the
    /// moment of the call. Returns the number of live deliveries. Closed
    /// subscribers are pruned; their loss is never an error here.
    pub fn publish(&self, topic: &Topic, event: &EventEnvelope) -> usize {
        // Snapshot the subscriber set so delivery never holds the shard
        // lock and concurrent (un)subscribes proceed unhindered.
        let snapshot: Vec<(SubscriptionId, Arc<Outbox>)> = match self.topics.get(topic) {
            Some(subscribers) => subscribers
                .iter()
                .map(|s| (s.id.clone(), Arc::clone(&s.outbox)))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (subscription_id, outbox) in snapshot {
            if outbox.push(event.clone()) {
                delivered += 1;
            } else {
                dead.push(subscription_id);
            }
        }

        for subscription_id in dead {
            warn!(
                topic = %topic,
                subscription_id = %subscription_id,
                "Subscriber gone, pruning subscription"
            );
            self.unsubscribe_by_id(&subscription_id);
        }

        if delivered > 0 {
            debug!(
                topic = %topic,
                delivered,
                event_type = event.event_type(),
                "Event published"
            );
        }
        delivered
    }

    /// Number of subscribers on a topic
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map_or(0, |subscribers| subscribers.len())
    }

    /// Number of topics with at least one subscriber
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new(256, 4096)
    }
}
