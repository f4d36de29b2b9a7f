use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{BroadcasterId, SessionId};

/// Lifecycle state of a stream session.
///
/// `Offline → Starting → Live → Ending → Offline`. `Starting` means the
/// ingest connection was accepted but no media has flowed yet; viewers keep
/// seeing the broadcaster as offline until the first frame heartbeat drives
/// the session `Live`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Offline,
    Starting,
    Live,
    Ending,
}

impl SessionState {
    /// Whether the session holds the broadcaster's single active slot
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Live)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Offline => "offline",
            Self::Starting => "starting",
            Self::Live => "live",
            Self::Ending => "ending",
        };
        write!(f, "{s}")
    }
}

/// Viewer-facing stream metadata, supplied at session start and mutable
/// while the session is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub title: String,
    pub category_id: Option<String>,
    pub description: String,
    pub language: String,
    pub tags: Vec<String>,
}

impl Default for StreamMetadata {
    fn default() -> Self {
        Self {
            title: String::new(),
            category_id: None,
            description: String::new(),
            language: "en".to_string(),
            tags: Vec::new(),
        }
    }
}

impl StreamMetadata {
    /// Metadata used when a publish attempt carries none of its own
    #[must_use]
    pub fn with_default_title(display_name: &str) -> Self {
        Self {
            title: format!("{display_name}'s live stream"),
            ..Self::default()
        }
    }
}

/// Point-in-time snapshot of one live attempt by one broadcaster.
///
/// Snapshots are what every reader sees: event payloads, the pull recovery
/// endpoint, and the sweep all consume these. The canonical mutable record
/// lives inside the session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSession {
    pub session_id: SessionId,
    pub broadcaster_id: BroadcasterId,
    pub state: SessionState,
    pub metadata: StreamMetadata,
    pub viewer_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StreamSession {
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.state, SessionState::Live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(SessionState::Starting.is_active());
        assert!(SessionState::Live.is_active());
        assert!(!SessionState::Offline.is_active());
        assert!(!SessionState::Ending.is_active());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::Starting).unwrap();
        assert_eq!(json, "\"starting\"");
    }

    #[test]
    fn test_default_title() {
        let metadata = StreamMetadata::with_default_title("ana");
        assert_eq!(metadata.title, "ana's live stream");
        assert_eq!(metadata.language, "en");
        assert!(metadata.tags.is_empty());
    }
}
