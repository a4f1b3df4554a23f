//! Session storage for CartMate
//! Narrow get/set/delete interface over a TTL'd key-value store. The
//! orchestrator persists serialized conversation context between turns;
//! absence of a key is a valid state meaning "new session".

use async_trait::async_trait;
use cartmate_core::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Best-effort session persistence interface.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the stored value for the session, if present and unexpired.
    async fn get(&self, session_id: &str) -> Result<Option<String>>;

    /// Stores the value under the session id with the given TTL.
    async fn set(&self, session_id: &str, value: String, ttl: Duration) -> Result<()>;

    /// Removes the session. Idempotent if already absent.
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// In-memory session store with lazy TTL expiry.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

struct StoredEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, "purged expired sessions");
        }
        purged
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<String>> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        match entries.get(session_id) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, session_id: &str, value: String, ttl: Duration) -> Result<()> {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1));
        let mut entries = self.entries.write().await;
        entries.insert(
            session_id.to_string(),
            StoredEntry {
                value,
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.entries.write().await.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemorySessionStore::new();
        store
            .set("session-1", "{\"turns\":[]}".into(), DEFAULT_SESSION_TTL)
            .await
            .unwrap();

        let value = store.get("session-1").await.unwrap();
        assert_eq!(value.as_deref(), Some("{\"turns\":[]}"));

        store.delete("session-1").await.unwrap();
        assert_eq!(store.get("session-1").await.unwrap(), None);

        // Idempotent delete.
        store.delete("session-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_absent_session_is_none() {
        let store = MemorySessionStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemorySessionStore::new();
        store
            .set("session-1", "value".into(), Duration::from_millis(30))
            .await
            .unwrap();
        assert!(store.get("session-1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("session-1").await.unwrap(), None);

        // The expired entry is still resident until purged.
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.purge_expired().await, 0);
    }
}
