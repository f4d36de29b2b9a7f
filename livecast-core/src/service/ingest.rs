//! Ingest gating and the session state machine
//!
//! Consumes the transport layer's publish/unpublish/heartbeat signals,
//! validates credentials, enforces the single-active-session invariant and
//! drives every state transition through the store's CAS. Status events go
//! out only after the store reflects the transition (store-then-notify), so
//! the pull path can always corroborate what a subscriber just saw.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::models::{
    EventEnvelope, EventKind, SessionId, SessionState, StreamMetadata, StreamSession,
};
use crate::service::credentials::SessionKeyValidator;
use crate::service::fanout::FanoutHub;
use crate::service::session_store::SessionStateStore;
use crate::{Error, Result};

/// Why a session was ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Explicit unpublish from the transport layer
    Unpublish,
    /// A newer accepted publish attempt for the same broadcaster
    Preempted,
    /// No frame heartbeat within the grace window
    HeartbeatTimeout,
}

impl EndReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Unpublish => "unpublish",
            Self::Preempted => "preempted",
            Self::HeartbeatTimeout => "heartbeat_timeout",
        }
    }
}

/// Bounded retries when publish attempts race for the same broadcaster slot
const MAX_INSTALL_ATTEMPTS: usize = 4;

/// Gate between the media transport and the session store
pub struct IngestGate {
    validator: Arc<dyn SessionKeyValidator>,
    store: Arc<SessionStateStore>,
    hub: Arc<FanoutHub>,
    /// Monotonic last-seen heartbeat per active session
    heartbeats: DashMap<SessionId, Instant>,
    heartbeat_grace: Duration,
}

impl IngestGate {
    #[must_use]
    pub fn new(
        validator: Arc<dyn SessionKeyValidator>,
        store: Arc<SessionStateStore>,
        hub: Arc<FanoutHub>,
        heartbeat_grace: Duration,
    ) -> Self {
        Self {
            validator,
            store,
            hub,
            heartbeats: DashMap::new(),
            heartbeat_grace,
        }
    }

    /// Synchronous accept/reject decision for a publish attempt.
    ///
    /// Resolves the credential, force-ends any active prior session for the
    /// broadcaster (last accepted attempt wins), and installs a fresh
    /// `Starting` session. The transport layer must refuse the connection on
    /// any error.
    pub async fn on_publish_attempt(
        &self,
        credential: &str,
        stream_path_segments: &[&str],
        metadata: Option<StreamMetadata>,
    ) -> Result<StreamSession> {
        let identity = self
            .validator
            .resolve(credential)
            .await?
            .ok_or(Error::InvalidCredential)?;

        let metadata = metadata
            .unwrap_or_else(|| StreamMetadata::with_default_title(&identity.display_name));
        let broadcaster_id = identity.broadcaster_id;

        for _ in 0..MAX_INSTALL_ATTEMPTS {
            let prior = self.store.get(&broadcaster_id);
            if let Some(ref prior_session) = prior {
                if prior_session.state.is_active() {
                    self.finish_session(&prior_session.session_id, EndReason::Preempted);
                }
            }
            let prior_id = prior.as_ref().map(|p| p.session_id.clone());

            if let Some(session) =
                self.store
                    .install_session(&broadcaster_id, prior_id.as_ref(), metadata.clone())
            {
                self.heartbeats
                    .insert(session.session_id.clone(), Instant::now());
                info!(
                    broadcaster_id = %broadcaster_id,
                    session_id = %session.session_id,
                    stream_path = %stream_path_segments.join("/"),
                    "Publish accepted, session starting"
                );
                return Ok(session);
            }
            // Slot moved between read and install; re-read and try again
        }

        info!(
            broadcaster_id = %broadcaster_id,
            "Publish attempt lost the install race"
        );
        Err(Error::Preempted)
    }

    /// Frame/heartbeat signal from the transport layer.
    ///
    /// Records liveness and drives `Starting -> Live` on the first
    /// confirmed frame. Heartbeats for unknown or already-ended sessions
    /// are no-ops.
    pub fn on_frame_heartbeat(&self, session_id: &SessionId) {
        let Some(session) = self.store.get_session(session_id) else {
            debug!(session_id = %session_id, "Heartbeat for unknown session ignored");
            return;
        };
        if !session.state.is_active() {
            return;
        }

        self.heartbeats.insert(session_id.clone(), Instant::now());

        if session.state == SessionState::Starting
            && self
                .store
                .compare_and_swap_state(session_id, SessionState::Starting, SessionState::Live)
        {
            // Store committed first; only now is the event observable.
            if let Some(live) = self.store.get_session(session_id) {
                info!(
                    broadcaster_id = %live.broadcaster_id,
                    session_id = %session_id,
                    "Session live"
                );
                self.hub.publish(
                    &crate::models::Topic::Status(live.broadcaster_id.clone()),
                    &EventEnvelope::status(EventKind::SessionStarted, live),
                );
            }
        }
    }

    /// Unpublish signal from the transport layer. Idempotent.
    pub fn on_unpublish(&self, session_id: &SessionId) {
        self.finish_session(session_id, EndReason::Unpublish);
    }

    /// Replace metadata on a live session and notify status subscribers.
    /// Metadata updates never create a new session.
    pub fn update_metadata(&self, session_id: &SessionId, metadata: StreamMetadata) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| Error::NotFound(format!("Session {session_id} not found")))?;
        if session.state != SessionState::Live {
            return Err(Error::SessionNotLive(session_id.to_string()));
        }

        self.store.set_metadata(session_id, metadata)?;
        if let Some(updated) = self.store.get_session(session_id) {
            self.hub.publish(
                &crate::models::Topic::Status(updated.broadcaster_id.clone()),
                &EventEnvelope::status(EventKind::MetadataUpdated, updated),
            );
        }
        Ok(())
    }

    /// End every active session whose heartbeat is older than the grace
    /// window. Idempotent: concurrent sweeps race on the CAS and a session
    /// is ended exactly once. Returns how many sessions this call ended.
    pub fn sweep_stale(&self) -> usize {
        let now = Instant::now();
        // Snapshot first; ending mutates the map we are iterating.
        let stale: Vec<SessionId> = self
            .heartbeats
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) > self.heartbeat_grace)
            .map(|entry| entry.key().clone())
            .collect();

        let mut ended = 0;
        for session_id in stale {
            if self.finish_session(&session_id, EndReason::HeartbeatTimeout) {
                ended += 1;
            } else {
                // Entry for a session something else already ended
                self.heartbeats.remove(&session_id);
            }
        }
        ended
    }

    /// Run the stale-session sweep at a fixed cadence. Spawned by the
    /// server; aborted on shutdown.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration) {
        info!(interval_seconds = interval.as_secs(), "Heartbeat sweeper started");
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // immediate first tick
        loop {
            ticker.tick().await;
            let ended = self.sweep_stale();
            if ended > 0 {
                debug!(ended, "Stale sessions ended by sweep");
            }
        }
    }

    /// Drive `Starting|Live -> Ending -> Offline` and publish the final
    /// status event. Returns false when the session was not active (the
    /// no-op re-end case).
    fn finish_session(&self, session_id: &SessionId, reason: EndReason) -> bool {
        let entered_ending = self
            .store
            .compare_and_swap_state(session_id, SessionState::Live, SessionState::Ending)
            || self.store.compare_and_swap_state(
                session_id,
                SessionState::Starting,
                SessionState::Ending,
            );
        if !entered_ending {
            return false;
        }

        // Ending -> Offline is immediate and synchronous; we hold the only
        // path out of Ending for this session.
        self.store
            .compare_and_swap_state(session_id, SessionState::Ending, SessionState::Offline);
        self.heartbeats.remove(session_id);

        let Some(ended) = self.store.get_session(session_id) else {
            return true;
        };
        match reason {
            EndReason::HeartbeatTimeout => warn!(
                broadcaster_id = %ended.broadcaster_id,
                session_id = %session_id,
                reason = reason.as_str(),
                "Session ended"
            ),
            _ => info!(
                broadcaster_id = %ended.broadcaster_id,
                session_id = %session_id,
                reason = reason.as_str(),
                "Session ended"
            ),
        }
        self.hub.publish(
            &crate::models::Topic::Status(ended.broadcaster_id.clone()),
            &EventEnvelope::status(EventKind::SessionEnded, ended),
        );
        true
    }
}
