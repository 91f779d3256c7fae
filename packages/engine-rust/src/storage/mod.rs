//! Shared key-value storage for persisted snapshots.
//!
//! The snapshot for a form lives under the form's schema id in a store that
//! every execution context ("tab") of the same origin can read and write.
//! [`SnapshotStorage`] abstracts that store together with its change
//! notifications, so the persistence manager never touches ambient global
//! state and tests can substitute their own backend.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use memory::{ContextStorage, SharedMemoryStorage};

/// Identity of one execution context sharing a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(String);

impl ContextId {
    /// A fresh random (UUID v4) id.
    #[must_use]
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Notification that a key changed in the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// Raw new value, or `None` if the key was removed.
    pub new_value: Option<String>,
    /// Context that performed the write.
    pub origin: ContextId,
}

/// Key-value store shared across execution contexts, with change
/// notifications.
///
/// Values are opaque strings; the persistence manager stores serialized
/// snapshots in them. Implementations must publish a [`StorageEvent`] for
/// every successful `set` and `remove`.
///
/// Used as `Arc<dyn SnapshotStorage>`.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Read the raw value stored under `key`.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Replace the raw value stored under `key`.
    async fn set(&self, key: &str, raw: &str) -> anyhow::Result<()>;

    /// Delete `key`.
    async fn remove(&self, key: &str) -> anyhow::Result<()>;

    /// Subscribe to changes made by any context.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;

    /// The context writes through this handle are attributed to.
    fn context_id(&self) -> &ContextId;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn random_context_ids_differ() {
        assert_ne!(ContextId::random(), ContextId::random());
    }

    #[test]
    fn named_context_id_displays_name() {
        assert_eq!(ContextId::named("tab-a").to_string(), "tab-a");
        assert_eq!(ContextId::named("tab-a").as_str(), "tab-a");
    }

    /// Verifies `Arc<dyn SnapshotStorage>` compiles (object safety).
    #[test]
    fn snapshot_storage_is_object_safe() {
        fn _assert_object_safe(_: &Arc<dyn SnapshotStorage>) {}
    }
}
