//! Canonical live/offline state for every broadcaster
//!
//! Owns all session records, current and historical. `state` has exactly one
//! mutation path, `compare_and_swap_state`; the current-session slot has
//! exactly one, `install_session`. Everything else reads snapshots. This is
//! what makes the ingest pre-emption race resolve deterministically: of two
//! near-simultaneous publish attempts, one install succeeds and the loser
//! observes failure without ever becoming visible to readers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::models::{BroadcasterId, SessionId, SessionState, StreamMetadata, StreamSession};
use crate::{Error, Result};

struct StateCell {
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

/// Canonical mutable record for one session. Never handed out; readers get
/// `StreamSession` snapshots.
struct SessionRecord {
    session_id: SessionId,
    broadcaster_id: BroadcasterId,
    state: Mutex<StateCell>,
    metadata: RwLock<StreamMetadata>,
    viewer_count: AtomicU64,
}

impl SessionRecord {
    fn new(broadcaster_id: BroadcasterId, metadata: StreamMetadata) -> Self {
        Self {
            session_id: SessionId::new(),
            broadcaster_id,
            state: Mutex::new(StateCell {
                state: SessionState::Starting,
                started_at: None,
                ended_at: None,
            }),
            metadata: RwLock::new(metadata),
            viewer_count: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> StreamSession {
        let cell = self.state.lock();
        StreamSession {
            session_id: self.session_id.clone(),
            broadcaster_id: self.broadcaster_id.clone(),
            state: cell.state,
            metadata: self.metadata.read().clone(),
            viewer_count: self.viewer_count.load(Ordering::Relaxed),
            started_at: cell.started_at,
            ended_at: cell.ended_at,
        }
    }
}

/// Session state store: single-writer-per-field discipline over sharded maps.
#[derive(Default)]
pub struct SessionStateStore {
    /// Every session ever created, retained as historical record
    sessions: DashMap<SessionId, Arc<SessionRecord>>,
    /// The broadcaster's current (most recent installed) session
    current: DashMap<BroadcasterId, SessionId>,
}

impl SessionStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the broadcaster's current session, if any
    #[must_use]
    pub fn get(&self, broadcaster_id: &BroadcasterId) -> Option<StreamSession> {
        let session_id = self.current.get(broadcaster_id).map(|id| id.value().clone())?;
        self.get_session(&session_id)
    }

    /// Snapshot of any session, current or historical
    #[must_use]
    pub fn get_session(&self, session_id: &SessionId) -> Option<StreamSession> {
        self.sessions.get(session_id).map(|record| record.snapshot())
    }

    /// The sole mutation path for session state.
    ///
    /// Swaps `expected -> new` atomically and stamps `started_at` on entry
    /// into `Live` and `ended_at` on entry into `Offline`. Returns false when
    /// the session is unknown or its state is not `expected`; callers treat
    /// that as losing a race, never as a fault.
    pub fn compare_and_swap_state(
        &self,
        session_id: &SessionId,
        expected: SessionState,
        new: SessionState,
    ) -> bool {
        let Some(record) = self.sessions.get(session_id) else {
            return false;
        };
        let mut cell = record.state.lock();
        if cell.state != expected {
            return false;
        }
        cell.state = new;
        match new {
            SessionState::Live if cell.started_at.is_none() => {
                cell.started_at = Some(Utc::now());
            }
            SessionState::Offline if cell.ended_at.is_none() => {
                cell.ended_at = Some(Utc::now());
            }
            _ => {}
        }
        debug!(
            session_id = %session_id,
            from = %expected,
            to = %new,
            "Session state transition"
        );
        true
    }

    /// Install a fresh `Starting` session as the broadcaster's current
    /// session, atomically with respect to other installs for the same
    /// broadcaster.
    ///
    /// Succeeds only if the current slot still holds `prior` (None for a
    /// broadcaster with no session yet) and that prior session is no longer
    /// active. The loser of a publish race gets `None`; its attempt was
    /// never observable.
    pub fn install_session(
        &self,
        broadcaster_id: &BroadcasterId,
        prior: Option<&SessionId>,
        metadata: StreamMetadata,
    ) -> Option<StreamSession> {
        use dashmap::mapref::entry::Entry;

        match self.current.entry(broadcaster_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if prior != Some(occupied.get()) {
                    return None;
                }
                // Slot unchanged since the caller looked; refuse if the
                // resident session somehow became active again.
                if self
                    .sessions
                    .get(occupied.get())
                    .is_some_and(|record| record.state.lock().state.is_active())
                {
                    return None;
                }
                let record = Arc::new(SessionRecord::new(broadcaster_id.clone(), metadata));
                let snapshot = record.snapshot();
                self.sessions.insert(record.session_id.clone(), record);
                occupied.insert(snapshot.session_id.clone());
                Some(snapshot)
            }
            Entry::Vacant(vacant) => {
                if prior.is_some() {
                    return None;
                }
                let record = Arc::new(SessionRecord::new(broadcaster_id.clone(), metadata));
                let snapshot = record.snapshot();
                self.sessions.insert(record.session_id.clone(), record);
                vacant.insert(snapshot.session_id.clone());
                Some(snapshot)
            }
        }
    }

    /// Replace session metadata. Unconditional; the caller owns the
    /// while-live policy.
    pub fn set_metadata(&self, session_id: &SessionId, metadata: StreamMetadata) -> Result<()> {
        let record = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("Session {session_id} not found")))?;
        *record.metadata.write() = metadata;
        Ok(())
    }

    /// Commit a viewer-count snapshot. Written only by the viewer counter.
    pub fn commit_viewer_count(&self, session_id: &SessionId, count: u64) -> Result<()> {
        let record = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("Session {session_id} not found")))?;
        record.viewer_count.store(count, Ordering::Relaxed);
        Ok(())
    }

    /// Current sessions in `Starting` or `Live` (the sweep's input)
    #[must_use]
    pub fn active_sessions(&self) -> Vec<StreamSession> {
        self.current
            .iter()
            .filter_map(|entry| self.get_session(entry.value()))
            .filter(|session| session.state.is_active())
            .collect()
    }

    /// Live sessions ordered by viewer count descending, for browse/recovery
    /// reads.
    #[must_use]
    pub fn live_sessions(&self) -> Vec<StreamSession> {
        let mut sessions: Vec<StreamSession> = self
            .current
            .iter()
            .filter_map(|entry| self.get_session(entry.value()))
            .filter(StreamSession::is_live)
            .collect();
        sessions.sort_by(|a, b| b.viewer_count.cmp(&a.viewer_count));
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_session() -> (SessionStateStore, BroadcasterId, SessionId) {
        let store = SessionStateStore::new();
        let broadcaster = BroadcasterId::new();
        let session = store
            .install_session(&broadcaster, None, StreamMetadata::default())
            .unwrap();
        (store, broadcaster, session.session_id)
    }

    #[test]
    fn test_install_first_session() {
        let (store, broadcaster, session_id) = store_with_session();
        let current = store.get(&broadcaster).unwrap();
        assert_eq!(current.session_id, session_id);
        assert_eq!(current.state, SessionState::Starting);
        assert!(current.started_at.is_none());
    }

    #[test]
    fn test_install_requires_matching_prior() {
        let (store, broadcaster, session_id) = store_with_session();

        // Stale prior (None) loses once a session exists
        assert!(store
            .install_session(&broadcaster, None, StreamMetadata::default())
            .is_none());

        // Active prior refuses install even with a matching slot
        assert!(store
            .install_session(&broadcaster, Some(&session_id), StreamMetadata::default())
            .is_none());

        // Once the prior is offline, a matching install succeeds
        assert!(store.compare_and_swap_state(&session_id, SessionState::Starting, SessionState::Ending));
        assert!(store.compare_and_swap_state(&session_id, SessionState::Ending, SessionState::Offline));
        let replacement = store
            .install_session(&broadcaster, Some(&session_id), StreamMetadata::default())
            .unwrap();
        assert_ne!(replacement.session_id, session_id);
        assert_eq!(store.get(&broadcaster).unwrap().session_id, replacement.session_id);
    }

    #[test]
    fn test_cas_stamps_timestamps() {
        let (store, _, session_id) = store_with_session();

        assert!(store.compare_and_swap_state(&session_id, SessionState::Starting, SessionState::Live));
        let live = store.get_session(&session_id).unwrap();
        assert!(live.started_at.is_some());
        assert!(live.ended_at.is_none());

        assert!(store.compare_and_swap_state(&session_id, SessionState::Live, SessionState::Ending));
        assert!(store.compare_and_swap_state(&session_id, SessionState::Ending, SessionState::Offline));
        let offline = store.get_session(&session_id).unwrap();
        assert_eq!(offline.state, SessionState::Offline);
        assert!(offline.ended_at.is_some());
    }

    #[test]
    fn test_cas_fails_on_wrong_expected() {
        let (store, _, session_id) = store_with_session();
        assert!(!store.compare_and_swap_state(&session_id, SessionState::Live, SessionState::Ending));
        assert!(!store.compare_and_swap_state(
            &SessionId::new(),
            SessionState::Starting,
            SessionState::Live
        ));
    }

    #[test]
    fn test_racing_cas_has_single_winner() {
        let (store, _, session_id) = store_with_session();
        store.compare_and_swap_state(&session_id, SessionState::Starting, SessionState::Live);

        let store = Arc::new(store);
        let winners: Vec<bool> = std::thread::scope(|scope| {
            (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let session_id = session_id.clone();
                    scope.spawn(move || {
                        store.compare_and_swap_state(
                            &session_id,
                            SessionState::Live,
                            SessionState::Ending,
                        )
                    })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });
        assert_eq!(winners.iter().filter(|won| **won).count(), 1);
    }

    #[test]
    fn test_historical_session_still_readable() {
        let (store, broadcaster, session_id) = store_with_session();
        store.compare_and_swap_state(&session_id, SessionState::Starting, SessionState::Ending);
        store.compare_and_swap_state(&session_id, SessionState::Ending, SessionState::Offline);
        let replacement = store
            .install_session(&broadcaster, Some(&session_id), StreamMetadata::default())
            .unwrap();

        assert_eq!(store.get(&broadcaster).unwrap().session_id, replacement.session_id);
        // The ended session is retained as history
        assert_eq!(
            store.get_session(&session_id).unwrap().state,
            SessionState::Offline
        );
    }

    #[test]
    fn test_live_sessions_ordered_by_viewers() {
        let store = SessionStateStore::new();
        let mut ids = Vec::new();
        for viewers in [3u64, 9, 1] {
            let broadcaster = BroadcasterId::new();
            let session = store
                .install_session(&broadcaster, None, StreamMetadata::default())
                .unwrap();
            store.compare_and_swap_state(&session.session_id, SessionState::Starting, SessionState::Live);
            store.commit_viewer_count(&session.session_id, viewers).unwrap();
            ids.push((session.session_id, viewers));
        }

        let live = store.live_sessions();
        let counts: Vec<u64> = live.iter().map(|s| s.viewer_count).collect();
        assert_eq!(counts, vec![9, 3, 1]);
    }

    #[test]
    fn test_viewer_count_and_metadata_writes() {
        let (store, _, session_id) = store_with_session();
        store.commit_viewer_count(&session_id, 42).unwrap();

        let metadata = StreamMetadata {
            title: "speedrun".to_string(),
            ..StreamMetadata::default()
        };
        store.set_metadata(&session_id, metadata).unwrap();

        let snapshot = store.get_session(&session_id).unwrap();
        assert_eq!(snapshot.viewer_count, 42);
        assert_eq!(snapshot.metadata.title, "speedrun");

        assert!(store.commit_viewer_count(&SessionId::new(), 1).is_err());
    }
}
