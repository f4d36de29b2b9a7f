pub mod id;
pub mod session;
pub mod chat;
pub mod event;

pub use id::{generate_id, BroadcasterId, SessionId, SubscriptionId, UserId};
pub use session::{SessionState, StreamMetadata, StreamSession};
pub use chat::ChatEvent;
pub use event::{EventEnvelope, EventKind, EventPayload, Topic};
