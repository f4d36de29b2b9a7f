//! Chat relay for live sessions
//!
//! Accepts chat submissions, persists them through the message store, and
//! republishes them on the session's chat topic. Chat is scoped to sessions
//! in `Live` state; persistence failures are surfaced to the caller and the
//! message is never published without a durable copy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::ChatConfig;
use crate::models::{ChatEvent, EventEnvelope, SessionId, Topic, UserId};
use crate::repository::ChatRepository;
use crate::service::fanout::FanoutHub;
use crate::service::rate_limit::RateLimiter;
use crate::service::session_store::SessionStateStore;
use crate::{Error, Result};

/// Chat relay service
#[derive(Clone)]
pub struct ChatRelay {
    store: Arc<SessionStateStore>,
    repository: Arc<dyn ChatRepository>,
    hub: Arc<FanoutHub>,
    rate_limiter: RateLimiter,
    config: ChatConfig,
}

impl std::fmt::Debug for ChatRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRelay").finish()
    }
}

impl ChatRelay {
    #[must_use]
    pub fn new(
        store: Arc<SessionStateStore>,
        repository: Arc<dyn ChatRepository>,
        hub: Arc<FanoutHub>,
        rate_limiter: RateLimiter,
        config: ChatConfig,
    ) -> Self {
        Self {
            store,
            repository,
            hub,
            rate_limiter,
            config,
        }
    }

    /// Submit a chat message to a live session.
    ///
    /// # Arguments
    /// * `session_id` - Session the message belongs to
    /// * `author_id` - User submitting the message
    /// * `body` - Message content
    /// * `is_moderator` - Whether the author moderates this stream
    ///
    /// # Returns
    /// The published message, or a rejection (`SessionNotLive`,
    /// `RateLimited`, `InvalidInput`, `PersistenceFailure`).
    pub async fn submit(
        &self,
        session_id: SessionId,
        author_id: UserId,
        body: String,
        is_moderator: bool,
    ) -> Result<ChatEvent> {
        let session = self
            .store
            .get_session(&session_id)
            .ok_or_else(|| Error::SessionNotLive(session_id.to_string()))?;
        if !session.is_live() {
            return Err(Error::SessionNotLive(session_id.to_string()));
        }

        let rate_key = format!("chat:{session_id}:{author_id}");
        self.rate_limiter.check_rate_limit(
            &rate_key,
            self.config.rate_limit_max_messages,
            self.config.rate_limit_window(),
        )?;

        if body.is_empty() {
            return Err(Error::InvalidInput(
                "Message content cannot be empty".to_string(),
            ));
        }
        if body.chars().count() > self.config.max_message_length {
            return Err(Error::InvalidInput(format!(
                "Message content must be at most {} characters",
                self.config.max_message_length
            )));
        }

        let message = ChatEvent::new(session_id.clone(), author_id.clone(), body, is_moderator);

        // Durable first; an unpersisted message must never reach subscribers
        self.repository.append(&message).await?;

        self.hub
            .publish(&Topic::Chat(session_id.clone()), &EventEnvelope::chat(message.clone()));

        info!(
            session_id = %session_id,
            author_id = %author_id,
            message_id = %message.id,
            "Chat message relayed"
        );
        Ok(message)
    }

    /// Timestamp-bounded backfill for reconnecting viewers.
    ///
    /// Returns messages sent strictly after `since` (all messages when
    /// None), oldest first, clamped to the configured history limit.
    pub async fn history(
        &self,
        session_id: &SessionId,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<ChatEvent>> {
        let limit = limit.min(self.config.history_limit);
        self.repository.list_since(session_id, since, limit).await
    }
}
