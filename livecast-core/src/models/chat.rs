use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{SessionId, UserId};

/// A chat message scoped to one live session. Immutable once published;
/// ordering is per-topic FIFO as observed by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub id: String, // nanoid(12)
    pub session_id: SessionId,
    pub author_id: UserId,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub is_moderator: bool,
}

impl ChatEvent {
    #[must_use]
    pub fn new(session_id: SessionId, author_id: UserId, body: String, is_moderator: bool) -> Self {
        Self {
            id: super::id::generate_id(),
            session_id,
            author_id,
            body,
            sent_at: Utc::now(),
            is_moderator,
        }
    }
}
