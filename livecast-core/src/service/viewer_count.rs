//! Viewer counting derived from fan-out subscriptions
//!
//! Folds the hub's subscribe/unsubscribe notifications into per-session
//! counts and commits snapshots to the session store on a fixed cadence,
//! bounding write amplification under connection churn. The counter owns
//! `viewer_count` exclusively; nothing else writes it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::{SessionId, SessionState, SubscriptionId, Topic};
use crate::service::fanout::SubscriptionEvent;
use crate::service::session_store::SessionStateStore;

/// Per-session viewer counter
pub struct ViewerCounter {
    store: Arc<SessionStateStore>,
    /// Which session each counted subscription belongs to; unsubscribes
    /// without an entry here are ignored rather than decrementing
    subscriptions: DashMap<SubscriptionId, SessionId>,
    counts: DashMap<SessionId, u64>,
}

impl ViewerCounter {
    #[must_use]
    pub fn new(store: Arc<SessionStateStore>) -> Self {
        Self {
            store,
            subscriptions: DashMap::new(),
            counts: DashMap::new(),
        }
    }

    /// Current in-memory count for a session (0 when untracked)
    #[must_use]
    pub fn count(&self, session_id: &SessionId) -> u64 {
        self.counts.get(session_id).map_or(0, |count| *count)
    }

    /// Fold one subscription event into the counts
    pub fn handle_event(&self, event: &SubscriptionEvent) {
        match event {
            SubscriptionEvent::Subscribed {
                topic,
                subscription_id,
            } => {
                let Some(session_id) = self.resolve_session(topic) else {
                    return;
                };
                self.subscriptions
                    .insert(subscription_id.clone(), session_id.clone());
                *self.counts.entry(session_id).or_insert(0) += 1;
            }
            SubscriptionEvent::Unsubscribed {
                subscription_id, ..
            } => {
                // Unknown subscriptions are ignored; the count never goes
                // negative
                let Some((_, session_id)) = self.subscriptions.remove(subscription_id) else {
                    return;
                };
                if let Some(mut count) = self.counts.get_mut(&session_id) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    /// A chat subscription names its session; a status subscription counts
    /// toward the broadcaster's currently active session, if any.
    fn resolve_session(&self, topic: &Topic) -> Option<SessionId> {
        match topic {
            Topic::Chat(session_id) => {
                self.store.get_session(session_id).map(|s| s.session_id)
            }
            Topic::Status(broadcaster_id) => self
                .store
                .get(broadcaster_id)
                .filter(|session| session.state.is_active())
                .map(|session| session.session_id),
        }
    }

    /// Commit all tracked counts to the store and drop state for sessions
    /// that have gone offline.
    pub fn commit(&self) {
        let snapshot: Vec<(SessionId, u64)> = self
            .counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        for (session_id, count) in snapshot {
            let offline = self
                .store
                .get_session(&session_id)
                .is_none_or(|session| session.state == SessionState::Offline);
            if offline {
                self.counts.remove(&session_id);
                self.subscriptions
                    .retain(|_, counted_session| *counted_session != session_id);
                continue;
            }
            if let Err(e) = self.store.commit_viewer_count(&session_id, count) {
                warn!(session_id = %session_id, "Failed to commit viewer count: {e}");
            } else {
                debug!(session_id = %session_id, count, "Viewer count committed");
            }
        }
    }

    /// Consume subscription events and commit on a fixed cadence. Spawned by
    /// the server; aborted on shutdown, or exits when the hub is dropped.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<SubscriptionEvent>,
        commit_interval: Duration,
    ) {
        info!(
            interval_seconds = commit_interval.as_secs(),
            "Viewer counter started"
        );
        let mut ticker = tokio::time::interval(commit_interval);
        ticker.tick().await; // immediate first tick
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => self.handle_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            "Viewer counter lagged behind by {n} subscription events; \
                             counts may drift until affected connections cycle"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Subscription event channel closed, viewer counter stopping");
                        break;
                    }
                },
                _ = ticker.tick() => self.commit(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BroadcasterId, StreamMetadata};
    use crate::service::fanout::FanoutHub;

    struct Fixture {
        store: Arc<SessionStateStore>,
        counter: ViewerCounter,
        broadcaster: BroadcasterId,
        session_id: SessionId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SessionStateStore::new());
        let broadcaster = BroadcasterId::new();
        let session = store
            .install_session(&broadcaster, None, StreamMetadata::default())
            .unwrap();
        store.compare_and_swap_state(&session.session_id, SessionState::Starting, SessionState::Live);
        let counter = ViewerCounter::new(Arc::clone(&store));
        Fixture {
            store,
            counter,
            broadcaster,
            session_id: session.session_id,
        }
    }

    fn subscribed(topic: Topic) -> (SubscriptionEvent, SubscriptionId) {
        let subscription_id = SubscriptionId::new();
        (
            SubscriptionEvent::Subscribed {
                topic,
                subscription_id: subscription_id.clone(),
            },
            subscription_id,
        )
    }

    #[tokio::test]
    async fn test_counts_status_and_chat_subscribers() {
        let f = fixture();

        let (event, _) = subscribed(Topic::Status(f.broadcaster.clone()));
        f.counter.handle_event(&event);
        let (event, chat_sub) = subscribed(Topic::Chat(f.session_id.clone()));
        f.counter.handle_event(&event);
        assert_eq!(f.counter.count(&f.session_id), 2);

        f.counter.handle_event(&SubscriptionEvent::Unsubscribed {
            topic: Topic::Chat(f.session_id.clone()),
            subscription_id: chat_sub,
        });
        assert_eq!(f.counter.count(&f.session_id), 1);
    }

    #[tokio::test]
    async fn test_unmatched_unsubscribes_never_go_negative() {
        let f = fixture();

        let (event, _) = subscribed(Topic::Status(f.broadcaster.clone()));
        f.counter.handle_event(&event);

        // Randomized-ish storm of unsubscribes for subscriptions we never saw
        for _ in 0..50 {
            f.counter.handle_event(&SubscriptionEvent::Unsubscribed {
                topic: Topic::Status(f.broadcaster.clone()),
                subscription_id: SubscriptionId::new(),
            });
        }
        assert_eq!(f.counter.count(&f.session_id), 1);

        f.counter.commit();
        assert_eq!(f.store.get_session(&f.session_id).unwrap().viewer_count, 1);
    }

    #[tokio::test]
    async fn test_status_subscribers_ignored_when_offline() {
        let f = fixture();
        f.store
            .compare_and_swap_state(&f.session_id, SessionState::Live, SessionState::Ending);
        f.store
            .compare_and_swap_state(&f.session_id, SessionState::Ending, SessionState::Offline);

        let (event, _) = subscribed(Topic::Status(f.broadcaster.clone()));
        f.counter.handle_event(&event);
        assert_eq!(f.counter.count(&f.session_id), 0);
    }

    #[tokio::test]
    async fn test_commit_drops_offline_sessions() {
        let f = fixture();
        let (event, _) = subscribed(Topic::Chat(f.session_id.clone()));
        f.counter.handle_event(&event);
        f.counter.commit();
        assert_eq!(f.store.get_session(&f.session_id).unwrap().viewer_count, 1);

        f.store
            .compare_and_swap_state(&f.session_id, SessionState::Live, SessionState::Ending);
        f.store
            .compare_and_swap_state(&f.session_id, SessionState::Ending, SessionState::Offline);
        f.counter.commit();
        assert_eq!(f.counter.count(&f.session_id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_commits_on_cadence() {
        let f = fixture();
        let hub = FanoutHub::default();
        let events = hub.subscription_events();

        let counter = Arc::new(ViewerCounter::new(Arc::clone(&f.store)));
        let handle = tokio::spawn(Arc::clone(&counter).run(events, Duration::from_secs(5)));

        // Two real subscriptions through the hub
        let (_sub_a, _stream_a) = hub.subscribe(Topic::Status(f.broadcaster.clone()));
        let (_sub_b, _stream_b) = hub.subscribe(Topic::Chat(f.session_id.clone()));

        // Let the counter drain both events, then cross a commit tick
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        assert_eq!(f.store.get_session(&f.session_id).unwrap().viewer_count, 2);
        handle.abort();
    }
}
