use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::chat::ChatEvent;
use super::id::{BroadcasterId, SessionId};
use super::session::StreamSession;

/// A fan-out channel. Status topics are keyed by broadcaster (they outlive
/// individual sessions); chat topics are keyed by session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Status(BroadcasterId),
    Chat(SessionId),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(broadcaster_id) => write!(f, "status:{broadcaster_id}"),
            Self::Chat(session_id) => write!(f, "chat:{session_id}"),
        }
    }
}

impl std::str::FromStr for Topic {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("status", id)) if !id.is_empty() => {
                Ok(Self::Status(BroadcasterId::from_string(id.to_string())))
            }
            Some(("chat", id)) if !id.is_empty() => {
                Ok(Self::Chat(SessionId::from_string(id.to_string())))
            }
            _ => Err(crate::Error::InvalidInput(format!("Invalid topic: {s}"))),
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Kind of a fan-out event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    SessionEnded,
    MetadataUpdated,
    ChatMessage,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::SessionEnded => "session_ended",
            Self::MetadataUpdated => "metadata_updated",
            Self::ChatMessage => "chat_message",
        }
    }
}

/// Event payload: a session snapshot for status events, a chat message for
/// chat events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Session(StreamSession),
    Chat(ChatEvent),
}

/// The envelope delivered to every subscriber connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub topic: Topic,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: EventPayload,
    pub at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Status event for a session, addressed to the broadcaster's status topic
    #[must_use]
    pub fn status(kind: EventKind, session: StreamSession) -> Self {
        Self {
            topic: Topic::Status(session.broadcaster_id.clone()),
            kind,
            payload: EventPayload::Session(session),
            at: Utc::now(),
        }
    }

    /// Chat event, addressed to the session's chat topic
    #[must_use]
    pub fn chat(message: ChatEvent) -> Self {
        Self {
            topic: Topic::Chat(message.session_id.clone()),
            kind: EventKind::ChatMessage,
            payload: EventPayload::Chat(message),
            at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}
