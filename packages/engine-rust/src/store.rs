//! Canonical form state: the value tree, the error map and the set of paths
//! with an async validation in flight.
//!
//! The tree is published through a `tokio::sync::watch` channel as an
//! `Arc<Value>`. Every effective write builds a fresh tree (copy, then
//! [`path::set_mut`]) and swaps in a new `Arc`, so observers such as the
//! persistence manager see a new top-level reference whenever any leaf
//! changes. Writes that change nothing publish nothing.
//!
//! Errors are keyed by full value path and are independent of the tree's
//! nesting. Clearing an error writes `""` rather than removing the entry, so
//! "validated, no error" stays distinguishable from "never validated".

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use formsync_core::{path, Value};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::error::EngineError;

/// Value tree, error map and validating set of one mounted form.
#[derive(Debug)]
pub struct FormStore {
    values: watch::Sender<Arc<Value>>,
    errors: RwLock<BTreeMap<String, String>>,
    validating: RwLock<BTreeSet<String>>,
}

impl FormStore {
    /// Creates a store holding an empty object and no errors.
    #[must_use]
    pub fn new() -> Self {
        let (values, _rx) = watch::channel(Arc::new(Value::empty_map()));
        Self {
            values,
            errors: RwLock::new(BTreeMap::new()),
            validating: RwLock::new(BTreeSet::new()),
        }
    }

    /// Current tree snapshot.
    #[must_use]
    pub fn values(&self) -> Arc<Value> {
        Arc::clone(&self.values.borrow())
    }

    /// Value at `path`, if present.
    #[must_use]
    pub fn get_value(&self, path: &str) -> Option<Value> {
        path::get(&self.values.borrow(), path).cloned()
    }

    /// Writes `value` at `path`. Returns `false` when the path could not be
    /// written (wrong container kind on the way) or nothing changed.
    pub fn set_value(&self, path: &str, value: Value) -> bool {
        self.values.send_if_modified(|current| {
            let mut next = Value::clone(current);
            if path::set_mut(&mut next, path, value) && next != **current {
                *current = Arc::new(next);
                true
            } else {
                false
            }
        })
    }

    /// Replaces the whole tree. Returns the published snapshot, so callers
    /// can later tell whether anything was written on top of it.
    pub fn set_all_values(&self, tree: Value) -> Arc<Value> {
        let tree = Arc::new(tree);
        self.values.send_replace(Arc::clone(&tree));
        tree
    }

    /// Appends `item` to the list at `repeater_path`, creating the list if
    /// absent. Returns the new item's index.
    ///
    /// # Errors
    ///
    /// [`EngineError::RepeaterFull`] when the list already holds `max` items,
    /// [`EngineError::ShapeMismatch`] when something other than a list sits at
    /// the path.
    pub fn append_item(
        &self,
        repeater_path: &str,
        item: Value,
        max: Option<usize>,
    ) -> Result<usize, EngineError> {
        let mut outcome = Ok(0);
        self.values.send_if_modified(|current| {
            let len = match item_count(current, repeater_path) {
                Ok(len) => len,
                Err(err) => {
                    outcome = Err(err);
                    return false;
                }
            };
            if let Some(max) = max.filter(|max| len >= *max) {
                outcome = Err(EngineError::RepeaterFull {
                    path: repeater_path.to_string(),
                    max,
                });
                return false;
            }
            let mut next = Value::clone(current);
            if !path::set_mut(&mut next, &path::join(repeater_path, len), item) {
                outcome = Err(EngineError::ShapeMismatch {
                    path: repeater_path.to_string(),
                    found: "non-container",
                });
                return false;
            }
            *current = Arc::new(next);
            outcome = Ok(len);
            true
        });
        outcome
    }

    /// Removes item `index` of the list at `repeater_path`, shifting later
    /// items down. Errors under the repeater are re-keyed to match: the
    /// removed item's entries are dropped and later items' entries move down
    /// by one index. Validating flags of the removed and shifted items are
    /// dropped, since their in-flight results no longer apply.
    ///
    /// # Errors
    ///
    /// [`EngineError::RepeaterAtMinimum`] when the list holds `min` items or
    /// fewer, [`EngineError::ItemOutOfRange`] when there is no such item,
    /// [`EngineError::ShapeMismatch`] when something other than a list sits
    /// at the path.
    pub fn remove_item(
        &self,
        repeater_path: &str,
        index: usize,
        min: Option<usize>,
    ) -> Result<Value, EngineError> {
        let mut outcome = Err(EngineError::ItemOutOfRange {
            path: repeater_path.to_string(),
            index,
        });
        self.values.send_if_modified(|current| {
            let len = match item_count(current, repeater_path) {
                Ok(len) => len,
                Err(err) => {
                    outcome = Err(err);
                    return false;
                }
            };
            if let Some(min) = min.filter(|min| len <= *min) {
                outcome = Err(EngineError::RepeaterAtMinimum {
                    path: repeater_path.to_string(),
                    min,
                });
                return false;
            }
            if index >= len {
                return false;
            }
            let mut next = Value::clone(current);
            match path::remove(&mut next, &path::join(repeater_path, index)) {
                Some(removed) => {
                    *current = Arc::new(next);
                    outcome = Ok(removed);
                    true
                }
                None => false,
            }
        });
        if outcome.is_ok() {
            let mut errors = self.errors.write();
            *errors = std::mem::take(&mut *errors)
                .into_iter()
                .filter_map(|(key, message)| match reindex(&key, repeater_path, index) {
                    Rekey::Keep => Some((key, message)),
                    Rekey::Drop => None,
                    Rekey::Move(new_key) => Some((new_key, message)),
                })
                .collect();
            drop(errors);

            self.validating
                .write()
                .retain(|key| reindex(key, repeater_path, index) == Rekey::Keep);
        }
        outcome
    }

    /// Observes tree replacements.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Value>> {
        self.values.subscribe()
    }

    // ---- errors ----

    /// Sets the error for `path`. `""` records "validated, no error".
    pub fn set_error(&self, path: &str, message: impl Into<String>) {
        self.errors.write().insert(path.to_string(), message.into());
    }

    /// Merges a batch of errors into the map.
    pub fn set_errors(&self, entries: impl IntoIterator<Item = (String, String)>) {
        self.errors.write().extend(entries);
    }

    /// Error recorded for `path`: `None` if never validated, `Some("")` if
    /// validated without error.
    #[must_use]
    pub fn error(&self, path: &str) -> Option<String> {
        self.errors.read().get(path).cloned()
    }

    /// Copy of the whole error map.
    #[must_use]
    pub fn errors(&self) -> BTreeMap<String, String> {
        self.errors.read().clone()
    }

    /// Drops every error entry.
    pub fn clear_errors(&self) {
        self.errors.write().clear();
    }

    // ---- validating ----

    pub fn set_validating(&self, path: &str, validating: bool) {
        let mut set = self.validating.write();
        if validating {
            set.insert(path.to_string());
        } else {
            set.remove(path);
        }
    }

    #[must_use]
    pub fn is_validating(&self, path: &str) -> bool {
        self.validating.read().contains(path)
    }

    pub fn clear_validating(&self) {
        self.validating.write().clear();
    }

    /// Resets the tree to an empty object and drops all errors and
    /// validating flags.
    pub fn reset(&self) {
        self.set_all_values(Value::empty_map());
        self.clear_errors();
        self.clear_validating();
    }
}

/// Number of items in the list at `path`. Absent and null count as empty.
fn item_count(tree: &Value, path: &str) -> Result<usize, EngineError> {
    match path::get(tree, path) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Array(items)) => Ok(items.len()),
        Some(other) => Err(EngineError::ShapeMismatch {
            path: path.to_string(),
            found: other.kind(),
        }),
    }
}

impl Default for FormStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Rekey {
    Keep,
    Drop,
    Move(String),
}

/// Where the entry for `key` goes after item `removed` of `repeater_path`
/// is deleted.
pub(crate) fn reindex(key: &str, repeater_path: &str, removed: usize) -> Rekey {
    let Some(rest) = key
        .strip_prefix(repeater_path)
        .and_then(|rest| rest.strip_prefix('.'))
    else {
        return Rekey::Keep;
    };
    let (index, tail) = match rest.split_once('.') {
        Some((index, tail)) => (index, Some(tail)),
        None => (rest, None),
    };
    let Ok(index) = index.parse::<usize>() else {
        return Rekey::Keep;
    };
    if index < removed {
        return Rekey::Keep;
    }
    if index == removed {
        return Rekey::Drop;
    }
    let moved = path::join(repeater_path, index - 1);
    Rekey::Move(match tail {
        Some(tail) => path::join(&moved, tail),
        None => moved,
    })
}
