//! Form session: one mounted form and everything it owns.
//!
//! A [`FormSession`] holds the store, the validation tracker, the option
//! registry and the persistence task for one schema. Mounting returns
//! immediately; the persisted snapshot is restored in the background (see
//! [`FormSession::wait_hydrated`]). Unmounting, explicitly or by dropping the
//! session, stops the persistence task and makes every outstanding async
//! continuation (option loads, async validations) a no-op.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use formsync_core::schema::item_default;
use formsync_core::{
    is_path_visible, path, validate_async, validate_sync, FieldKind, FieldSchema, FormSchema, Value,
};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::options::OptionsRegistry;
use crate::persistence::{
    Conflict, HydrationState, PersistenceHandle, PersistenceManager, Resolution,
};
use crate::storage::SnapshotStorage;
use crate::store::{reindex, FormStore, Rekey};
use crate::validation::ValidationTracker;
use crate::walker::{PendingLoad, RenderNode, Walker};

/// A mounted form.
pub struct FormSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    schema: ArcSwap<FormSchema>,
    store: Arc<FormStore>,
    validations: Arc<ValidationTracker>,
    options: OptionsRegistry,
    storage: Arc<dyn SnapshotStorage>,
    config: EngineConfig,
    runtime: Handle,
    persistence: Mutex<Option<PersistenceHandle>>,
    active: AtomicBool,
}

impl SessionInner {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn start_persistence(&self, schema: &FormSchema) -> PersistenceHandle {
        PersistenceManager::spawn(
            schema.id.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.validations),
            Arc::clone(&self.storage),
            &self.config,
            &self.runtime,
        )
    }
}

impl FormSession {
    /// Mounts `schema` against `storage` and starts restoring its snapshot.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn mount(schema: FormSchema, storage: Arc<dyn SnapshotStorage>, config: EngineConfig) -> Self {
        let inner = Arc::new(SessionInner {
            store: Arc::new(FormStore::new()),
            validations: Arc::new(ValidationTracker::new()),
            options: OptionsRegistry::new(),
            storage,
            config,
            runtime: Handle::current(),
            persistence: Mutex::new(None),
            active: AtomicBool::new(true),
            schema: ArcSwap::from_pointee(schema),
        });
        let handle = inner.start_persistence(&inner.schema.load());
        *inner.persistence.lock() = Some(handle);
        debug!(form_id = %inner.schema.load().id, "form mounted");
        Self { inner }
    }

    /// Schema currently driving the form.
    #[must_use]
    pub fn schema(&self) -> Arc<FormSchema> {
        self.inner.schema.load_full()
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.inner.is_active()
    }

    // ---- values ----

    /// Writes `value` at `path`. Returns `false` if the session is unmounted,
    /// the path cannot be written or nothing changed.
    pub fn set_value(&self, path: &str, value: impl Into<Value>) -> bool {
        self.inner.is_active() && self.inner.store.set_value(path, value.into())
    }

    #[must_use]
    pub fn get_value(&self, path: &str) -> Option<Value> {
        self.inner.store.get_value(path)
    }

    /// Current value tree.
    #[must_use]
    pub fn values(&self) -> Arc<Value> {
        self.inner.store.values()
    }

    /// Receiver notified on every effective change of the value tree.
    #[must_use]
    pub fn value_changes(&self) -> watch::Receiver<Arc<Value>> {
        self.inner.store.subscribe()
    }

    // ---- validation ----

    /// Error map keyed by value path. `""` means validated without error.
    #[must_use]
    pub fn errors(&self) -> BTreeMap<String, String> {
        self.inner.store.errors()
    }

    #[must_use]
    pub fn error(&self, path: &str) -> Option<String> {
        self.inner.store.error(path)
    }

    #[must_use]
    pub fn is_validating(&self, path: &str) -> bool {
        self.inner.store.is_validating(path)
    }

    /// Validates the field at `path` after it lost focus.
    ///
    /// Hidden fields are never validated: their error is set to `""` and any
    /// validation still in flight for them is discarded. Otherwise the sync
    /// rules run first; only when they pass does the async validator run, and
    /// its result is applied only if no newer validation of the same path has
    /// started in the meantime.
    pub async fn blur(&self, path: &str) {
        let inner = &self.inner;
        if !inner.is_active() {
            return;
        }
        let schema = inner.schema.load_full();
        let Some(located) = schema.locate(path) else {
            debug!(path, "blur on unknown field");
            return;
        };
        let field: &FieldSchema = located.field;
        let values = inner.store.values();

        if !is_path_visible(&schema, path, &values) {
            debug!(path, "skipping validation of hidden field");
            self.settle(path, None);
            return;
        }

        let value = path::get(&values, path);
        if let Some(message) = validate_sync(field, value) {
            self.settle(path, Some(message));
            return;
        }
        if field.async_validate.is_none() {
            self.settle(path, None);
            return;
        }

        let ticket = inner.validations.begin(path);
        inner.store.set_validating(path, true);
        let outcome = validate_async(field, value, &values).await;
        let committed = inner.validations.commit(&ticket, || {
            if inner.is_active() {
                inner.store.set_error(path, outcome.unwrap_or_default());
                inner.store.set_validating(path, false);
            }
        });
        if !committed {
            debug!(path, "discarding superseded validation result");
        }
    }

    /// Records a synchronous outcome and supersedes anything in flight.
    fn settle(&self, path: &str, message: Option<String>) {
        self.inner.validations.invalidate(path);
        self.inner.store.set_validating(path, false);
        self.inner.store.set_error(path, message.unwrap_or_default());
    }

    // ---- rendering ----

    /// Builds the render tree for the current state.
    ///
    /// Selects rendered for the first time start loading their options;
    /// selects no longer rendered are unmounted.
    #[must_use]
    pub fn render(&self) -> Vec<RenderNode> {
        let schema = self.inner.schema.load_full();
        let values = self.inner.store.values();
        let walk = Walker::new(&values, &self.inner.store, &self.inner.options).run(&schema.fields);

        self.inner.options.retain(|path| walk.selects.contains(path));
        if self.inner.is_active() {
            for load in walk.pending {
                spawn_option_load(&self.inner, load);
            }
        }
        walk.nodes
    }

    // ---- repeaters ----

    /// Appends a default item to the repeater at `repeater_path`. Returns
    /// the new item's index.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownField`] or [`EngineError::NotARepeater`] for a
    /// bad path, [`EngineError::RepeaterFull`] at `maxItems`,
    /// [`EngineError::Unmounted`] after unmount.
    pub fn add_item(&self, repeater_path: &str) -> Result<usize, EngineError> {
        if !self.inner.is_active() {
            return Err(EngineError::Unmounted);
        }
        let schema = self.inner.schema.load_full();
        let (fields, _, max_items) = repeater(&schema, repeater_path)?;
        let index = self
            .inner
            .store
            .append_item(repeater_path, item_default(fields), max_items)?;
        debug!(path = repeater_path, index, "repeater item added");
        Ok(index)
    }

    /// Removes item `index` of the repeater at `repeater_path`. Later items
    /// shift down along with their errors.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownField`] or [`EngineError::NotARepeater`] for a
    /// bad path, [`EngineError::RepeaterAtMinimum`] at `minItems`,
    /// [`EngineError::ItemOutOfRange`] for a missing item,
    /// [`EngineError::Unmounted`] after unmount.
    pub fn remove_item(&self, repeater_path: &str, index: usize) -> Result<Value, EngineError> {
        if !self.inner.is_active() {
            return Err(EngineError::Unmounted);
        }
        let schema = self.inner.schema.load_full();
        let (_, min_items, _) = repeater(&schema, repeater_path)?;
        let removed = self.inner.store.remove_item(repeater_path, index, min_items)?;
        self.inner
            .validations
            .invalidate_where(|key| reindex(key, repeater_path, index) != Rekey::Keep);
        debug!(path = repeater_path, index, "repeater item removed");
        Ok(removed)
    }

    // ---- persistence ----

    #[must_use]
    pub fn hydration_state(&self) -> HydrationState {
        self.inner
            .persistence
            .lock()
            .as_ref()
            .map_or(HydrationState::Uninitialized, PersistenceHandle::hydration_state)
    }

    /// Waits until the persisted snapshot (if any) has been applied.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unmounted`] if the session is unmounted first.
    pub async fn wait_hydrated(&self) -> Result<(), EngineError> {
        let mut hydration = self
            .inner
            .persistence
            .lock()
            .as_ref()
            .map(PersistenceHandle::hydration)
            .ok_or(EngineError::Unmounted)?;
        hydration
            .wait_for(|state| *state == HydrationState::Hydrated)
            .await
            .map_err(|_| EngineError::Unmounted)?;
        Ok(())
    }

    /// Pending conflict with another context, if any.
    #[must_use]
    pub fn conflict(&self) -> Option<Arc<Conflict>> {
        self.inner
            .persistence
            .lock()
            .as_ref()
            .and_then(PersistenceHandle::conflict)
    }

    /// Receiver notified whenever the pending conflict changes.
    #[must_use]
    pub fn conflict_changes(&self) -> watch::Receiver<Option<Arc<Conflict>>> {
        match self.inner.persistence.lock().as_ref() {
            Some(handle) => handle.conflict_changes(),
            None => watch::channel(None).1,
        }
    }

    /// Settles the pending conflict.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoPendingConflict`] when there is none,
    /// [`EngineError::Unmounted`] after unmount, or the storage error if
    /// `KeepLocal` could not be written.
    pub async fn resolve_conflict(&self, resolution: Resolution) -> Result<(), EngineError> {
        if !self.inner.is_active() {
            return Err(EngineError::Unmounted);
        }
        let resolver = self
            .inner
            .persistence
            .lock()
            .as_ref()
            .map(PersistenceHandle::resolver)
            .ok_or(EngineError::Unmounted)?;
        resolver.resolve(resolution).await
    }

    // ---- lifecycle ----

    /// Switches to a different schema. The current persistence task is
    /// stopped, all state is dropped and the new schema's snapshot is
    /// restored as on mount.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unmounted`] after unmount.
    pub async fn set_schema(&self, schema: FormSchema) -> Result<(), EngineError> {
        if !self.inner.is_active() {
            return Err(EngineError::Unmounted);
        }
        let previous = self.inner.persistence.lock().take();
        if let Some(previous) = previous {
            previous.stop().await;
        }
        if !self.inner.is_active() {
            return Err(EngineError::Unmounted);
        }

        self.inner.validations.invalidate_all();
        self.inner.options.clear();
        self.inner.store.reset();
        debug!(form_id = %schema.id, "switching schema");
        self.inner.schema.store(Arc::new(schema));
        let handle = self.inner.start_persistence(&self.inner.schema.load());
        *self.inner.persistence.lock() = Some(handle);
        Ok(())
    }

    /// Tears the session down. Idempotent.
    pub fn unmount(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.inner.persistence.lock().take() {
            handle.shutdown();
        }
        self.inner.validations.invalidate_all();
        self.inner.options.clear();
        debug!(form_id = %self.inner.schema.load().id, "form unmounted");
    }
}

impl Drop for FormSession {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl std::fmt::Debug for FormSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormSession")
            .field("form_id", &self.inner.schema.load().id)
            .field("active", &self.inner.is_active())
            .finish_non_exhaustive()
    }
}

/// Resolves `repeater_path` to a repeater's fields and item bounds.
fn repeater<'a>(
    schema: &'a FormSchema,
    repeater_path: &str,
) -> Result<(&'a [FieldSchema], Option<usize>, Option<usize>), EngineError> {
    let field = schema
        .locate(repeater_path)
        .ok_or_else(|| EngineError::UnknownField {
            path: repeater_path.to_string(),
        })?
        .field;
    match &field.kind {
        FieldKind::Repeater {
            fields,
            min_items,
            max_items,
        } => Ok((fields, *min_items, *max_items)),
        _ => Err(EngineError::NotARepeater {
            path: repeater_path.to_string(),
            kind: field.kind_name(),
        }),
    }
}

fn spawn_option_load(inner: &Arc<SessionInner>, load: PendingLoad) {
    let session = Arc::clone(inner);
    inner.runtime.spawn(async move {
        let PendingLoad {
            path,
            mount_id,
            loader,
        } = load;
        let result = match AssertUnwindSafe(loader.load()).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("option loader panicked")),
        };
        if !session.is_active() {
            return;
        }
        if !session.options.complete(&path, mount_id, result) {
            debug!(path = %path, "discarding options for unmounted select");
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use formsync_core::{FnLoader, FnValidator, ManualClock, Operator, SelectOption};
    use serde_json::json;

    use super::*;
    use crate::options::{OptionsState, LOAD_FAILED_MESSAGE};
    use crate::storage::{ContextId, SharedMemoryStorage};
    use crate::walker::RenderKind;

    fn mount(schema: FormSchema) -> FormSession {
        let shared = SharedMemoryStorage::new();
        let storage: Arc<dyn SnapshotStorage> = Arc::new(shared.context(ContextId::named("tab")));
        FormSession::mount(
            schema,
            storage,
            EngineConfig::default().with_clock(Arc::new(ManualClock::new(1_000))),
        )
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn blur_unknown_field_writes_nothing() {
        let session = mount(FormSchema::new("f", vec![FieldSchema::text("name", "Name")]));
        session.wait_hydrated().await.unwrap();
        session.blur("missing").await;
        assert!(session.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn blur_without_rules_clears_error() {
        let session = mount(FormSchema::new("f", vec![FieldSchema::text("name", "Name")]));
        session.wait_hydrated().await.unwrap();
        session.blur("name").await;
        assert_eq!(session.error("name"), Some(String::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn async_validator_error_reports_generic_failure() {
        let validator = Arc::new(FnValidator(|_value: Value, _values: Value| async {
            Err::<Option<String>, _>(anyhow::anyhow!("backend down"))
        }));
        let session = mount(FormSchema::new(
            "f",
            vec![FieldSchema::text("name", "Name").with_async_validator(validator)],
        ));
        session.wait_hydrated().await.unwrap();
        session.set_value("name", "Ada");
        session.blur("name").await;
        assert_eq!(session.error("name"), Some("Validation failed".to_string()));
        assert!(!session.is_validating("name"));
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_group_child_is_not_validated() {
        let session = mount(FormSchema::new(
            "f",
            vec![
                FieldSchema::checkbox("flag", "Flag"),
                FieldSchema::group("extra", "Extra", vec![FieldSchema::text("note", "Note").required()])
                    .visible_if("flag", Operator::Equals, true),
            ],
        ));
        session.wait_hydrated().await.unwrap();
        session.blur("extra.note").await;
        assert_eq!(session.error("extra.note"), Some(String::new()));

        session.set_value("flag", true);
        session.blur("extra.note").await;
        assert_eq!(session.error("extra.note"), Some("This field is required".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn select_options_load_once_per_mount() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let loader = Arc::new(FnLoader(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, anyhow::Error>(vec![SelectOption::new("India", "IN")])
            }
        }));
        let session = mount(FormSchema::new(
            "f",
            vec![FieldSchema::select("country", "Country").with_option_loader(loader)],
        ));
        session.wait_hydrated().await.unwrap();

        let first = session.render();
        assert_eq!(
            first[0].kind,
            RenderKind::Select { value: String::new(), options: OptionsState::Loading }
        );
        let _ = session.render();
        settle(100).await;

        let loaded = session.render();
        assert_eq!(
            loaded[0].kind,
            RenderKind::Select {
                value: String::new(),
                options: OptionsState::Loaded(vec![SelectOption::new("India", "IN")]),
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn select_unmounted_while_loading_discards_result() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let loader = Arc::new(FnLoader(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, anyhow::Error>(vec![SelectOption::new("India", "IN")])
            }
        }));
        let session = mount(FormSchema::new(
            "f",
            vec![
                FieldSchema::checkbox("show", "Show"),
                FieldSchema::select("country", "Country")
                    .with_option_loader(loader)
                    .visible_if("show", Operator::Equals, true),
            ],
        ));
        session.wait_hydrated().await.unwrap();

        session.set_value("show", true);
        let _ = session.render();
        session.set_value("show", false);
        let _ = session.render();
        settle(100).await;

        // Shown again: a fresh mount loads again.
        session.set_value("show", true);
        let nodes = session.render();
        let country = RenderNode::find(&nodes, "country").unwrap();
        assert_eq!(
            country.kind,
            RenderKind::Select { value: String::new(), options: OptionsState::Loading }
        );
        settle(1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_option_load_is_field_local() {
        let loader = Arc::new(FnLoader(|| async {
            Err::<Vec<SelectOption>, _>(anyhow::anyhow!("network down"))
        }));
        let session = mount(FormSchema::new(
            "f",
            vec![FieldSchema::select("country", "Country").with_option_loader(loader)],
        ));
        session.wait_hydrated().await.unwrap();
        let _ = session.render();
        settle(10).await;

        let nodes = session.render();
        assert_eq!(
            nodes[0].kind,
            RenderKind::Select {
                value: String::new(),
                options: OptionsState::Failed(LOAD_FAILED_MESSAGE.to_string()),
            }
        );
        assert_eq!(nodes[0].error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn add_item_rejects_non_repeaters() {
        let session = mount(FormSchema::new("f", vec![FieldSchema::text("name", "Name")]));
        assert!(matches!(
            session.add_item("name"),
            Err(EngineError::NotARepeater { kind: "text", .. })
        ));
        assert!(matches!(session.add_item("nope"), Err(EngineError::UnknownField { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn unmounted_session_rejects_mutations() {
        let session = mount(FormSchema::new(
            "f",
            vec![FieldSchema::repeater("items", "Items", vec![FieldSchema::text("s", "S")])],
        ));
        session.wait_hydrated().await.unwrap();
        session.unmount();
        session.unmount();

        assert!(!session.is_mounted());
        assert!(!session.set_value("items", json!([])));
        assert!(matches!(session.add_item("items"), Err(EngineError::Unmounted)));
        assert!(matches!(
            session.resolve_conflict(Resolution::KeepLocal).await,
            Err(EngineError::Unmounted)
        ));
        assert_eq!(session.hydration_state(), HydrationState::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn set_schema_restores_new_form() {
        let shared = SharedMemoryStorage::new();
        shared
            .context(ContextId::named("seed"))
            .set("second", r#"{"values":{"b":"restored"},"savedAt":10}"#)
            .await
            .unwrap();
        let storage: Arc<dyn SnapshotStorage> = Arc::new(shared.context(ContextId::named("tab")));
        let session = FormSession::mount(
            FormSchema::new("first", vec![FieldSchema::text("a", "A")]),
            storage,
            EngineConfig::default(),
        );
        session.wait_hydrated().await.unwrap();
        session.set_value("a", "x");
        session.inner.store.set_error("a", "boom");

        session
            .set_schema(FormSchema::new("second", vec![FieldSchema::text("b", "B")]))
            .await
            .unwrap();
        session.wait_hydrated().await.unwrap();

        assert_eq!(session.schema().id, "second");
        assert_eq!(*session.values(), Value::from(json!({"b": "restored"})));
        assert!(session.errors().is_empty());
    }
}
