//! Generation tokens for async field validation.
//!
//! Every async validation started for a path takes a [`ValidationTicket`]
//! carrying a fresh generation number. Anything that should make an
//! in-flight result stale (a newer validation of the same path, the field
//! turning hidden, a sync failure, removal of the enclosing repeater item,
//! a conflict resolution that replaces the tree) moves the path to a newer
//! generation. A result is committed only while its ticket is still the
//! path's current generation, so the last *started* validation wins no
//! matter in which order the validators finish.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Proof that a validation was started for `path` at `generation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTicket {
    path: String,
    generation: u64,
}

impl ValidationTicket {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Current validation generation per field path.
#[derive(Debug, Default)]
pub struct ValidationTracker {
    generations: DashMap<String, u64>,
    counter: AtomicU64,
}

impl ValidationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Starts a validation for `path`, superseding any in flight.
    pub fn begin(&self, path: &str) -> ValidationTicket {
        let generation = self.next_generation();
        self.generations.insert(path.to_string(), generation);
        ValidationTicket {
            path: path.to_string(),
            generation,
        }
    }

    /// Makes any in-flight validation of `path` stale.
    pub fn invalidate(&self, path: &str) {
        if let Some(mut current) = self.generations.get_mut(path) {
            *current = self.next_generation();
        }
    }

    /// Makes in-flight validations stale for every path matching `pred`.
    pub fn invalidate_where(&self, pred: impl Fn(&str) -> bool) {
        for mut entry in self.generations.iter_mut() {
            if pred(entry.key()) {
                *entry.value_mut() = self.next_generation();
            }
        }
    }

    /// Makes every in-flight validation stale.
    pub fn invalidate_all(&self) {
        self.invalidate_where(|_| true);
    }

    /// Whether `ticket` is still the newest validation of its path.
    #[must_use]
    pub fn is_current(&self, ticket: &ValidationTicket) -> bool {
        self.generations
            .get(&ticket.path)
            .is_some_and(|current| *current == ticket.generation)
    }

    /// Runs `apply` if `ticket` is still current. The path's entry stays
    /// locked while `apply` runs, so no newer validation can start in
    /// between the check and the write. Returns whether `apply` ran.
    pub fn commit(&self, ticket: &ValidationTicket, apply: impl FnOnce()) -> bool {
        match self.generations.get(&ticket.path) {
            Some(current) if *current == ticket.generation => {
                apply();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn fresh_ticket_is_current() {
        let tracker = ValidationTracker::new();
        let ticket = tracker.begin("name");
        assert_eq!(ticket.path(), "name");
        assert!(tracker.is_current(&ticket));
    }

    #[test]
    fn newer_ticket_supersedes_older() {
        let tracker = ValidationTracker::new();
        let first = tracker.begin("name");
        let second = tracker.begin("name");
        assert!(!tracker.is_current(&first));
        assert!(tracker.is_current(&second));
    }

    #[test]
    fn paths_are_independent() {
        let tracker = ValidationTracker::new();
        let name = tracker.begin("name");
        let _email = tracker.begin("email");
        assert!(tracker.is_current(&name));
    }

    #[test]
    fn invalidate_makes_ticket_stale() {
        let tracker = ValidationTracker::new();
        let ticket = tracker.begin("name");
        tracker.invalidate("name");
        assert!(!tracker.is_current(&ticket));
        // Invalidating an unknown path is harmless.
        tracker.invalidate("missing");
    }

    #[test]
    fn invalidate_where_matches_predicate() {
        let tracker = ValidationTracker::new();
        let kept = tracker.begin("items.0.s");
        let dropped = tracker.begin("items.1.s");
        tracker.invalidate_where(|path| path.starts_with("items.1."));
        assert!(tracker.is_current(&kept));
        assert!(!tracker.is_current(&dropped));
    }

    #[test]
    fn invalidate_all_stales_everything() {
        let tracker = ValidationTracker::new();
        let a = tracker.begin("a");
        let b = tracker.begin("b");
        tracker.invalidate_all();
        assert!(!tracker.is_current(&a));
        assert!(!tracker.is_current(&b));
    }

    #[test]
    fn commit_runs_only_for_current_ticket() {
        let tracker = ValidationTracker::new();
        let applied = Cell::new(0);
        let first = tracker.begin("name");
        let second = tracker.begin("name");

        assert!(!tracker.commit(&first, || applied.set(applied.get() + 1)));
        assert_eq!(applied.get(), 0);
        assert!(tracker.commit(&second, || applied.set(applied.get() + 1)));
        assert_eq!(applied.get(), 1);
    }
}
