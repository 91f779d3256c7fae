//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use formsync_core::{FormSchema, ManualClock};
use formsync_engine::{
    ContextId, EngineConfig, FormSession, SharedMemoryStorage, SnapshotStorage, StorageEvent,
};
use tokio::sync::broadcast;

pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub fn config(clock_ms: u64) -> EngineConfig {
    EngineConfig::default().with_clock(Arc::new(ManualClock::new(clock_ms)))
}

/// Mounts `schema` as context `tab` on `shared`.
pub fn mount_on(shared: &Arc<SharedMemoryStorage>, tab: &str, schema: FormSchema, clock_ms: u64) -> FormSession {
    let storage: Arc<dyn SnapshotStorage> = Arc::new(shared.context(ContextId::named(tab)));
    FormSession::mount(schema, storage, config(clock_ms))
}

/// Writes a raw snapshot as some other context would.
pub async fn write_remote(shared: &Arc<SharedMemoryStorage>, key: &str, raw: &str) {
    shared
        .context(ContextId::named("remote"))
        .set(key, raw)
        .await
        .unwrap();
}

/// Storage whose reads take `delay` and which counts writes.
pub struct SlowStorage {
    inner: Arc<dyn SnapshotStorage>,
    delay: Duration,
    pub writes: AtomicUsize,
}

impl SlowStorage {
    pub fn new(inner: Arc<dyn SnapshotStorage>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner,
            delay,
            writes: AtomicUsize::new(0),
        })
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStorage for SlowStorage {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, raw: &str) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, raw).await
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.inner.remove(key).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.inner.subscribe()
    }

    fn context_id(&self) -> &ContextId {
        self.inner.context_id()
    }
}
