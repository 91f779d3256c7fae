//! In-memory [`SnapshotStorage`] shared by every context in the process.
//!
//! [`SharedMemoryStorage`] plays the role of the origin-wide store; each
//! context talks to it through its own [`ContextStorage`] handle, which
//! attributes writes to that context. Entries live in a [`DashMap`] and
//! change notifications fan out over a `tokio` broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{ContextId, SnapshotStorage, StorageEvent};

/// Default capacity of the change-notification channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Process-wide key-value store with broadcast change notifications.
#[derive(Debug)]
pub struct SharedMemoryStorage {
    entries: DashMap<String, String>,
    events: broadcast::Sender<StorageEvent>,
    writes: AtomicU64,
}

impl SharedMemoryStorage {
    /// Creates an empty store with [`DEFAULT_EVENT_CAPACITY`].
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates an empty store whose notification channel buffers
    /// `event_capacity` events per subscriber.
    #[must_use]
    pub fn with_capacity(event_capacity: usize) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(event_capacity.max(1));
        Arc::new(Self {
            entries: DashMap::new(),
            events,
            writes: AtomicU64::new(0),
        })
    }

    /// Returns a handle that reads and writes on behalf of `context_id`.
    #[must_use]
    pub fn context(self: &Arc<Self>, context_id: ContextId) -> ContextStorage {
        ContextStorage {
            shared: Arc::clone(self),
            context_id,
        }
    }

    /// Current raw value under `key`.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    /// Number of successful `set` calls across all contexts.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn put(&self, key: &str, raw: &str, origin: &ContextId) {
        self.entries.insert(key.to_string(), raw.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors -- there may be no subscribers yet.
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            new_value: Some(raw.to_string()),
            origin: origin.clone(),
        });
    }

    fn delete(&self, key: &str, origin: &ContextId) {
        if self.entries.remove(key).is_some() {
            let _ = self.events.send(StorageEvent {
                key: key.to_string(),
                new_value: None,
                origin: origin.clone(),
            });
        }
    }
}

/// One context's view of a [`SharedMemoryStorage`].
#[derive(Debug, Clone)]
pub struct ContextStorage {
    shared: Arc<SharedMemoryStorage>,
    context_id: ContextId,
}

impl ContextStorage {
    /// The store behind this handle.
    #[must_use]
    pub fn shared(&self) -> &Arc<SharedMemoryStorage> {
        &self.shared
    }
}

#[async_trait]
impl SnapshotStorage for ContextStorage {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.shared.raw(key))
    }

    async fn set(&self, key: &str, raw: &str) -> anyhow::Result<()> {
        self.shared.put(key, raw, &self.context_id);
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.shared.delete(key, &self.context_id);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.shared.events.subscribe()
    }

    fn context_id(&self) -> &ContextId {
        &self.context_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_across_contexts() {
        let shared = SharedMemoryStorage::new();
        let tab_a = shared.context(ContextId::named("a"));
        let tab_b = shared.context(ContextId::named("b"));

        tab_a.set("form", "payload").await.unwrap();
        assert_eq!(tab_b.get("form").await.unwrap(), Some("payload".to_string()));
        assert_eq!(shared.raw("form"), Some("payload".to_string()));
        assert_eq!(shared.write_count(), 1);
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let shared = SharedMemoryStorage::new();
        let tab = shared.context(ContextId::named("a"));
        assert_eq!(tab.get("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn writes_are_broadcast_with_origin() {
        let shared = SharedMemoryStorage::new();
        let tab_a = shared.context(ContextId::named("a"));
        let tab_b = shared.context(ContextId::named("b"));
        let mut rx = tab_b.subscribe();

        tab_a.set("form", "v1").await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "form");
        assert_eq!(event.new_value.as_deref(), Some("v1"));
        assert_eq!(event.origin, ContextId::named("a"));
    }

    #[tokio::test]
    async fn remove_broadcasts_none() {
        let shared = SharedMemoryStorage::new();
        let tab = shared.context(ContextId::named("a"));
        tab.set("form", "v1").await.unwrap();
        let mut rx = tab.subscribe();

        tab.remove("form").await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.new_value, None);
        assert_eq!(tab.get("form").await.unwrap(), None);
    }

    #[tokio::test]
    async fn removing_missing_key_is_silent() {
        let shared = SharedMemoryStorage::new();
        let tab = shared.context(ContextId::named("a"));
        let mut rx = tab.subscribe();
        tab.remove("form").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn context_handle_reports_its_id() {
        let shared = SharedMemoryStorage::new();
        let tab = shared.context(ContextId::named("tab-7"));
        assert_eq!(tab.context_id().as_str(), "tab-7");
        assert!(Arc::ptr_eq(tab.shared(), &shared));
    }
}
