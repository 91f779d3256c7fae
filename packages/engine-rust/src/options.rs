//! Select option loading, once per field mount.
//!
//! A select field is "mounted" from the first render that shows it until the
//! first render that does not. Mounting starts exactly one load; further
//! renders reuse its state. Every mount gets a fresh id, and a load result is
//! applied only if its field is still mounted under the same id, so results
//! for unmounted (or unmounted and re-mounted) fields are dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use formsync_core::SelectOption;

/// Field-local error shown when the option loader fails.
pub const LOAD_FAILED_MESSAGE: &str = "Failed to load options";

/// Option list state of one mounted select field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionsState {
    Loading,
    Loaded(Vec<SelectOption>),
    /// Load error, distinct from the field's validation error.
    Failed(String),
}

#[derive(Debug)]
struct Slot {
    mount_id: u64,
    state: OptionsState,
}

/// Outcome of [`OptionsRegistry::mount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mount {
    /// Newly mounted; the caller must start a load tagged with this id.
    Started(u64),
    /// Already mounted; nothing to do.
    Existing,
}

/// Option state of every mounted select field, keyed by value path.
#[derive(Debug, Default)]
pub struct OptionsRegistry {
    slots: DashMap<String, Slot>,
    next_mount: AtomicU64,
}

impl OptionsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts the select at `path` in the `Loading` state unless it is
    /// already mounted.
    pub fn mount(&self, path: &str) -> Mount {
        if self.slots.contains_key(path) {
            return Mount::Existing;
        }
        let mount_id = self.next_mount.fetch_add(1, Ordering::Relaxed) + 1;
        match self.slots.entry(path.to_string()) {
            dashmap::Entry::Occupied(_) => Mount::Existing,
            dashmap::Entry::Vacant(slot) => {
                slot.insert(Slot {
                    mount_id,
                    state: OptionsState::Loading,
                });
                Mount::Started(mount_id)
            }
        }
    }

    /// Mounts a select that has no loader: it shows an empty, loaded list.
    pub fn mount_static(&self, path: &str) {
        let mount_id = self.next_mount.fetch_add(1, Ordering::Relaxed) + 1;
        self.slots.entry(path.to_string()).or_insert(Slot {
            mount_id,
            state: OptionsState::Loaded(Vec::new()),
        });
    }

    /// Applies a load result if `path` is still mounted under `mount_id`.
    /// Returns whether the result was applied.
    pub fn complete(
        &self,
        path: &str,
        mount_id: u64,
        result: anyhow::Result<Vec<SelectOption>>,
    ) -> bool {
        let Some(mut slot) = self.slots.get_mut(path) else {
            return false;
        };
        if slot.mount_id != mount_id {
            return false;
        }
        slot.state = match result {
            Ok(options) => OptionsState::Loaded(options),
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "select option load failed");
                OptionsState::Failed(LOAD_FAILED_MESSAGE.to_string())
            }
        };
        true
    }

    #[must_use]
    pub fn state(&self, path: &str) -> Option<OptionsState> {
        self.slots.get(path).map(|slot| slot.state.clone())
    }

    #[must_use]
    pub fn is_mounted(&self, path: &str) -> bool {
        self.slots.contains_key(path)
    }

    /// Unmounts every select for which `keep` returns `false`.
    pub fn retain(&self, keep: impl Fn(&str) -> bool) {
        self.slots.retain(|path, _| keep(path));
    }

    /// Unmounts everything.
    pub fn clear(&self) {
        self.slots.clear();
    }
}
