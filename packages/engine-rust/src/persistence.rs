//! Persistence and cross-context conflict management.
//!
//! One background task per mounted form owns everything that touches the
//! storage entry:
//!
//! 1. **Restore.** Reads the snapshot stored under the form id and, if it
//!    decodes, replaces the value tree with it. Until this finishes the form
//!    is `Restoring` and nothing is written.
//! 2. **Autosave.** Every value change restarts a debounce timer; when it
//!    expires the current tree is written with a fresh `savedAt`.
//! 3. **Conflict detection.** Storage events from other contexts carrying a
//!    newer snapshot whose values differ from the local tree raise a
//!    [`Conflict`]. Autosave is held back until the conflict is resolved
//!    through a [`ConflictResolver`].

use std::sync::Arc;
use std::time::Duration;

use formsync_core::{SaveClock, Value};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::snapshot::{self, PersistedSnapshot};
use crate::storage::{SnapshotStorage, StorageEvent};
use crate::store::FormStore;
use crate::validation::ValidationTracker;

// ---------------------------------------------------------------------------
// Public state types
// ---------------------------------------------------------------------------

/// Whether the persisted snapshot has been applied yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationState {
    Uninitialized,
    Restoring,
    Hydrated,
}

/// A newer snapshot written by another context that disagrees with the
/// local tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub remote_values: Value,
    pub remote_saved_at: u64,
}

/// How to settle a pending [`Conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Replace the local tree with the remote one and clear all errors.
    AcceptRemote,
    /// Overwrite the remote snapshot with the local tree.
    KeepLocal,
}

enum Command {
    Resolve {
        resolution: Resolution,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Owner's side of a running persistence task.
#[derive(Debug)]
pub struct PersistenceHandle {
    hydration: watch::Receiver<HydrationState>,
    conflict: watch::Receiver<Option<Arc<Conflict>>>,
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PersistenceHandle {
    #[must_use]
    pub fn hydration_state(&self) -> HydrationState {
        *self.hydration.borrow()
    }

    /// Receiver for hydration state transitions.
    #[must_use]
    pub fn hydration(&self) -> watch::Receiver<HydrationState> {
        self.hydration.clone()
    }

    #[must_use]
    pub fn conflict(&self) -> Option<Arc<Conflict>> {
        self.conflict.borrow().clone()
    }

    /// Receiver that is notified whenever a conflict is raised, replaced or
    /// settled.
    #[must_use]
    pub fn conflict_changes(&self) -> watch::Receiver<Option<Arc<Conflict>>> {
        self.conflict.clone()
    }

    #[must_use]
    pub fn resolver(&self) -> ConflictResolver {
        ConflictResolver {
            commands: self.commands.clone(),
        }
    }

    /// Signals the task to stop without waiting for it.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Signals the task to stop and waits until it has.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PersistenceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sends conflict resolutions to the persistence task.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    commands: mpsc::Sender<Command>,
}

impl ConflictResolver {
    /// Settles the pending conflict.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoPendingConflict`] when there is nothing to resolve,
    /// [`EngineError::Unmounted`] when the task has stopped, and the storage
    /// error if `KeepLocal` could not write. A failed resolution leaves the
    /// conflict pending.
    pub async fn resolve(&self, resolution: Resolution) -> Result<(), EngineError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Resolve { resolution, reply })
            .await
            .map_err(|_| EngineError::Unmounted)?;
        response.await.map_err(|_| EngineError::Unmounted)?
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Resolve { resolution, .. } => f
                .debug_struct("Resolve")
                .field("resolution", resolution)
                .finish_non_exhaustive(),
        }
    }
}

// ---------------------------------------------------------------------------
// Manager task
// ---------------------------------------------------------------------------

/// State owned by the persistence task.
pub struct PersistenceManager {
    form_id: String,
    store: Arc<FormStore>,
    validations: Arc<ValidationTracker>,
    storage: Arc<dyn SnapshotStorage>,
    clock: SaveClock,
    debounce: Duration,
    /// `savedAt` of the newest snapshot known to match local state: the last
    /// one written, restored or adopted.
    last_saved: u64,
    hydration: watch::Sender<HydrationState>,
    conflict: watch::Sender<Option<Arc<Conflict>>>,
}

impl PersistenceManager {
    /// Starts the persistence task for `store` on `runtime`.
    ///
    /// Subscriptions to the store and to storage events are taken before
    /// the task starts, so nothing that happens after this call is missed.
    /// Accepting a remote snapshot makes every validation tracked by
    /// `validations` stale.
    pub fn spawn(
        form_id: impl Into<String>,
        store: Arc<FormStore>,
        validations: Arc<ValidationTracker>,
        storage: Arc<dyn SnapshotStorage>,
        config: &EngineConfig,
        runtime: &Handle,
    ) -> PersistenceHandle {
        let form_id = form_id.into();
        let (hydration_tx, hydration_rx) = watch::channel(HydrationState::Uninitialized);
        let (conflict_tx, conflict_rx) = watch::channel(None);
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let changes = store.subscribe();
        let initial = store.values();
        let events = storage.subscribe();
        let span = info_span!(
            "persistence",
            form_id = %form_id,
            context = %storage.context_id(),
        );

        let manager = Self {
            form_id,
            store,
            validations,
            storage,
            clock: SaveClock::new(Arc::clone(&config.clock)),
            debounce: config.autosave_debounce(),
            last_saved: 0,
            hydration: hydration_tx,
            conflict: conflict_tx,
        };
        let task = runtime.spawn(
            manager
                .run(initial, changes, events, commands_rx, shutdown_rx)
                .instrument(span),
        );

        PersistenceHandle {
            hydration: hydration_rx,
            conflict: conflict_rx,
            commands: commands_tx,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    async fn run(
        mut self,
        initial: Arc<Value>,
        mut changes: watch::Receiver<Arc<Value>>,
        mut events: broadcast::Receiver<StorageEvent>,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.hydration.send_replace(HydrationState::Restoring);
        let restored = tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            restored = self.restore() => restored,
        };

        // Edits made while restoring are kept (and saved) only if there was
        // no snapshot to restore; otherwise the snapshot replaces them. Edits
        // landing after the snapshot is applied are ordinary edits.
        let found = restored.is_some();
        let baseline = match restored {
            Some(snapshot) => {
                debug!(saved_at = snapshot.saved_at, "restored snapshot");
                self.adopt(snapshot.saved_at);
                self.store.set_all_values(snapshot.values)
            }
            None => initial,
        };
        let schedule = edited_since(&mut changes, &baseline);
        self.hydration.send_replace(HydrationState::Hydrated);
        info!(restored = found, "form hydrated");

        let sleep = tokio::time::sleep(self.debounce);
        tokio::pin!(sleep);
        let mut armed = schedule;
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                command = commands.recv() => {
                    let Some(Command::Resolve { resolution, reply }) = command else {
                        break;
                    };
                    let result = self.resolve(resolution, &mut changes, &mut armed).await;
                    if result.is_ok() && armed && resolution == Resolution::AcceptRemote {
                        sleep.as_mut().reset(Instant::now() + self.debounce);
                    }
                    let _ = reply.send(result);
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    changes.borrow_and_update();
                    sleep.as_mut().reset(Instant::now() + self.debounce);
                    armed = true;
                }
                event = events.recv(), if events_open => match event {
                    Ok(event) => self.on_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed storage events, re-reading snapshot");
                        self.reread().await;
                    }
                    Err(RecvError::Closed) => {
                        debug!("storage event stream closed");
                        events_open = false;
                    }
                },
                () = &mut sleep, if armed => {
                    armed = false;
                    self.autosave().await;
                }
            }
        }
        debug!("persistence task stopped");
    }

    async fn restore(&self) -> Option<PersistedSnapshot> {
        let raw = match self.storage.get(&self.form_id).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(error = %err, "failed to read snapshot, starting empty");
                return None;
            }
        };
        match snapshot::decode(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(error = %err, "ignoring malformed snapshot");
                None
            }
        }
    }

    /// Records `saved_at` as matching local state.
    fn adopt(&mut self, saved_at: u64) {
        self.last_saved = saved_at;
        self.clock.observe(saved_at);
    }

    async fn autosave(&mut self) {
        if self.conflict.borrow().is_some() {
            debug!("autosave held back by pending conflict");
            return;
        }
        match self.save_now().await {
            Ok(saved_at) => debug!(saved_at, "autosaved"),
            Err(err) => warn!(error = %err, "autosave failed"),
        }
    }

    async fn save_now(&mut self) -> Result<u64, EngineError> {
        let values = self.store.values();
        let saved_at = self.clock.tick();
        let raw = snapshot::encode(&values, saved_at)?;
        self.storage
            .set(&self.form_id, &raw)
            .instrument(info_span!("save", saved_at))
            .await?;
        self.last_saved = saved_at;
        Ok(saved_at)
    }

    fn on_event(&mut self, event: StorageEvent) {
        if event.key != self.form_id || event.origin == *self.storage.context_id() {
            return;
        }
        let Some(raw) = event.new_value else {
            debug!(origin = %event.origin, "snapshot removed by another context");
            return;
        };
        match snapshot::decode(&raw) {
            Ok(remote) => self.reconcile(remote),
            Err(err) => warn!(origin = %event.origin, error = %err, "ignoring malformed remote snapshot"),
        }
    }

    async fn reread(&mut self) {
        match self.storage.get(&self.form_id).await {
            Ok(Some(raw)) => match snapshot::decode(&raw) {
                Ok(remote) => self.reconcile(remote),
                Err(err) => warn!(error = %err, "ignoring malformed snapshot"),
            },
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to re-read snapshot"),
        }
    }

    fn reconcile(&mut self, remote: PersistedSnapshot) {
        if remote.saved_at <= self.last_saved {
            debug!(
                remote_saved_at = remote.saved_at,
                last_saved = self.last_saved,
                "ignoring stale remote snapshot"
            );
            return;
        }
        if *self.store.values() == remote.values {
            self.adopt(remote.saved_at);
            self.conflict.send_if_modified(|pending| pending.take().is_some());
            return;
        }
        warn!(remote_saved_at = remote.saved_at, "remote snapshot conflicts with local state");
        self.conflict.send_replace(Some(Arc::new(Conflict {
            remote_values: remote.values,
            remote_saved_at: remote.saved_at,
        })));
    }

    async fn resolve(
        &mut self,
        resolution: Resolution,
        changes: &mut watch::Receiver<Arc<Value>>,
        armed: &mut bool,
    ) -> Result<(), EngineError> {
        let conflict = self
            .conflict
            .borrow()
            .clone()
            .ok_or(EngineError::NoPendingConflict)?;
        match resolution {
            Resolution::AcceptRemote => {
                let accepted = self.store.set_all_values(conflict.remote_values.clone());
                // Results still in flight were computed against the replaced
                // tree; they must not land after the errors are cleared.
                self.validations.invalidate_all();
                self.store.clear_errors();
                self.store.clear_validating();
                // Only an edit made after the remote tree went in is unsaved.
                *armed = edited_since(changes, &accepted);
                self.adopt(conflict.remote_saved_at);
                info!(saved_at = conflict.remote_saved_at, "accepted remote snapshot");
            }
            Resolution::KeepLocal => {
                self.clock.observe(conflict.remote_saved_at);
                let saved_at = self.save_now().await?;
                info!(saved_at, "kept local values over remote snapshot");
            }
        }
        self.conflict.send_replace(None);
        Ok(())
    }
}

/// Marks the current tree as seen and reports whether it moved past
/// `baseline`. Comparing snapshots instead of reading the change flag first
/// keeps an edit that lands between the two steps from being swallowed.
fn edited_since(changes: &mut watch::Receiver<Arc<Value>>, baseline: &Arc<Value>) -> bool {
    let current = changes.borrow_and_update();
    !Arc::ptr_eq(&*current, baseline)
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("form_id", &self.form_id)
            .field("last_saved", &self.last_saved)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
