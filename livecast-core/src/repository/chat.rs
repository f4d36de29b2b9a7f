//! Chat message persistence boundary
//!
//! The message store is an external collaborator. The relay only needs
//! append and timestamp-bounded reads, so that is the whole contract;
//! deployments back it with whatever store the surrounding platform uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::models::{ChatEvent, SessionId};
use crate::Result;

/// Persistence contract for chat messages
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Persist a single message. Must be durable before returning Ok.
    async fn append(&self, message: &ChatEvent) -> Result<()>;

    /// Messages for a session sent strictly after `since` (all messages when
    /// `since` is None), oldest first, at most `limit`.
    async fn list_since(
        &self,
        session_id: &SessionId,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<ChatEvent>>;
}

/// In-memory chat repository, the default for single-process deployments
/// and the reference implementation for tests.
#[derive(Default)]
pub struct MemoryChatRepository {
    messages: DashMap<SessionId, Vec<ChatEvent>>,
}

impl MemoryChatRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatRepository for MemoryChatRepository {
    async fn append(&self, message: &ChatEvent) -> Result<()> {
        self.messages
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn list_since(
        &self,
        session_id: &SessionId,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<ChatEvent>> {
        let Some(messages) = self.messages.get(session_id) else {
            return Ok(Vec::new());
        };
        Ok(messages
            .iter()
            .filter(|m| since.is_none_or(|ts| m.sent_at > ts))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;

    #[tokio::test]
    async fn test_append_and_list() {
        let repository = MemoryChatRepository::new();
        let session = SessionId::new();
        let author = UserId::new();

        for i in 0..3 {
            let message =
                ChatEvent::new(session.clone(), author.clone(), format!("msg {i}"), false);
            repository.append(&message).await.unwrap();
        }

        let messages = repository.list_since(&session, None, 100).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].body, "msg 0");
        assert_eq!(messages[2].body, "msg 2");
    }

    #[tokio::test]
    async fn test_list_since_bounds() {
        let repository = MemoryChatRepository::new();
        let session = SessionId::new();
        let author = UserId::new();

        let first = ChatEvent::new(session.clone(), author.clone(), "old".to_string(), false);
        repository.append(&first).await.unwrap();
        let second = ChatEvent::new(session.clone(), author.clone(), "new".to_string(), false);
        repository.append(&second).await.unwrap();

        let messages = repository
            .list_since(&session, Some(first.sent_at), 100)
            .await
            .unwrap();
        assert!(messages.iter().all(|m| m.sent_at > first.sent_at));

        let limited = repository.list_since(&session, None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let repository = MemoryChatRepository::new();
        let messages = repository
            .list_since(&SessionId::new(), None, 10)
            .await
            .unwrap();
        assert!(messages.is_empty());
    }
}
