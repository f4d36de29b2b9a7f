pub mod credentials;
pub mod session_store;
pub mod ingest;
pub mod fanout;
pub mod chat;
pub mod rate_limit;
pub mod viewer_count;

pub use credentials::{BroadcasterIdentity, SessionKeyValidator, StaticKeyValidator};
pub use session_store::SessionStateStore;
pub use ingest::{EndReason, IngestGate};
pub use fanout::{EventStream, FanoutHub, Subscription, SubscriptionEvent};
pub use chat::ChatRelay;
pub use rate_limit::{RateLimitError, RateLimiter};
pub use viewer_count::ViewerCounter;
