//! Ingest credential resolution
//!
//! Maps an opaque stream key to a broadcaster identity. Resolution is a pure
//! lookup; a miss is the expected outcome for forged or revoked keys and the
//! caller must refuse the ingest attempt without creating any session.

use async_trait::async_trait;
use dashmap::DashMap;
use nanoid::nanoid;

use crate::models::BroadcasterId;
use crate::Result;

/// Immutable binding of an ingest credential to a broadcaster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcasterIdentity {
    pub broadcaster_id: BroadcasterId,
    pub display_name: String,
}

/// Credential resolution contract.
///
/// Implementations must be safe for concurrent calls from many ingest
/// attempts. `Ok(None)` means the credential is unknown or revoked; only
/// infrastructure faults (an unreachable backing store, say) are errors.
#[async_trait]
pub trait SessionKeyValidator: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<Option<BroadcasterIdentity>>;
}

/// Generate a fresh stream key
fn generate_stream_key() -> String {
    format!("sk_live_{}", nanoid!(32))
}

/// In-memory key table. Keys are created and rotated only through the
/// administrative operations below, never by the ingest path.
#[derive(Default)]
pub struct StaticKeyValidator {
    keys: DashMap<String, BroadcasterIdentity>,
}

impl StaticKeyValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a stream key for a broadcaster. Returns the generated key.
    pub fn register(&self, broadcaster_id: BroadcasterId, display_name: impl Into<String>) -> String {
        let key = generate_stream_key();
        self.keys.insert(
            key.clone(),
            BroadcasterIdentity {
                broadcaster_id,
                display_name: display_name.into(),
            },
        );
        key
    }

    /// Issue a specific key (used when keys are provisioned externally)
    pub fn register_key(
        &self,
        key: impl Into<String>,
        broadcaster_id: BroadcasterId,
        display_name: impl Into<String>,
    ) {
        self.keys.insert(
            key.into(),
            BroadcasterIdentity {
                broadcaster_id,
                display_name: display_name.into(),
            },
        );
    }

    /// Rotate the broadcaster's key: the old key stops resolving and a new
    /// one is returned. `None` if the broadcaster has no key.
    pub fn rotate(&self, broadcaster_id: &BroadcasterId) -> Option<String> {
        let old_key = self
            .keys
            .iter()
            .find(|entry| entry.value().broadcaster_id == *broadcaster_id)
            .map(|entry| entry.key().clone())?;
        let (_, identity) = self.keys.remove(&old_key)?;
        let new_key = generate_stream_key();
        self.keys.insert(new_key.clone(), identity);
        Some(new_key)
    }

    /// Revoke the broadcaster's key without issuing a replacement
    pub fn revoke(&self, broadcaster_id: &BroadcasterId) -> bool {
        let old_key = self
            .keys
            .iter()
            .find(|entry| entry.value().broadcaster_id == *broadcaster_id)
            .map(|entry| entry.key().clone());
        match old_key {
            Some(key) => self.keys.remove(&key).is_some(),
            None => false,
        }
    }
}

#[async_trait]
impl SessionKeyValidator for StaticKeyValidator {
    async fn resolve(&self, credential: &str) -> Result<Option<BroadcasterIdentity>> {
        Ok(self.keys.get(credential).map(|entry| entry.value().clone()))
    }
}
