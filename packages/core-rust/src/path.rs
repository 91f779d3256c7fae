//! Dotted-path addressing into a [`Value`] tree.
//!
//! A path is a `.`-separated sequence of segments. A segment that parses as a
//! finite number addresses an array element, anything else addresses an
//! object key: `addresses.0.street` is key `addresses`, index `0`, key
//! `street`.
//!
//! # Writes
//!
//! [`set_mut`] creates missing (or `null`) intermediate containers on the way
//! down, picking an array when the following segment is numeric and an object
//! otherwise. If an existing intermediate has the wrong container kind the
//! write is refused and the tree is left untouched. The check runs before any
//! mutation, so a refused write never leaves half-built containers behind.
//!
//! Numeric segments that are not non-negative integers (`-1`, `1.5`), or that
//! exceed [`MAX_ARRAY_INDEX`], never resolve and never write.

use crate::types::Value;

/// Largest array index a path may address. Writing past the end of an array
/// pads it with `null`, so this bounds the allocation a single write can cause.
pub const MAX_ARRAY_INDEX: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
    /// Numeric, but not a usable array index.
    Unaddressable,
}

impl Segment<'_> {
    fn is_addressable(self) -> bool {
        !matches!(self, Segment::Unaddressable)
    }

    /// Empty container a missing slot is created as when this segment follows.
    fn empty_container(self) -> Value {
        match self {
            Segment::Index(_) => Value::Array(Vec::new()),
            Segment::Key(_) | Segment::Unaddressable => Value::empty_map(),
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn parse_segment(raw: &str) -> Segment<'_> {
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => {
            if n >= 0.0 && n.fract() == 0.0 && n <= MAX_ARRAY_INDEX as f64 {
                Segment::Index(n as usize)
            } else {
                Segment::Unaddressable
            }
        }
        _ => Segment::Key(raw),
    }
}

fn parse_path(path: &str) -> Vec<Segment<'_>> {
    path.split('.').map(parse_segment).collect()
}

/// Returns `true` if the segment parses as an array index.
#[must_use]
pub fn is_index_segment(raw: &str) -> bool {
    matches!(parse_segment(raw), Segment::Index(_))
}

/// Joins a parent path and a child segment. An empty parent yields the bare
/// segment.
#[must_use]
pub fn join(parent: &str, segment: impl std::fmt::Display) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{parent}.{segment}")
    }
}

/// Reads the value at `path`.
///
/// Returns `None` if the path is empty or any segment is missing, lands on
/// `null` before the end, or indexes into the wrong container kind.
#[must_use]
pub fn get<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut cur = tree;
    for segment in parse_path(path) {
        cur = match (segment, cur) {
            (Segment::Index(i), Value::Array(items)) => items.get(i)?,
            (Segment::Key(k), Value::Map(entries)) => entries.get(k)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Mutable counterpart of [`get`].
pub fn get_mut<'a>(tree: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    if path.is_empty() {
        return None;
    }
    let mut cur = tree;
    for segment in parse_path(path) {
        cur = match (segment, cur) {
            (Segment::Index(i), Value::Array(items)) => items.get_mut(i)?,
            (Segment::Key(k), Value::Map(entries)) => entries.get_mut(k)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Writes `value` at `path` in place. Returns whether the write happened.
pub fn set_mut(tree: &mut Value, path: &str, value: Value) -> bool {
    if path.is_empty() {
        return false;
    }
    let segments = parse_path(path);
    if !is_writable(tree, &segments) {
        return false;
    }
    write(tree, &segments, value);
    true
}

/// Returns a copy of `tree` with `value` written at `path`.
///
/// A refused write returns an unchanged copy.
#[must_use]
pub fn set(tree: &Value, path: &str, value: Value) -> Value {
    let mut next = tree.clone();
    set_mut(&mut next, path, value);
    next
}

/// Removes the value at `path`, returning it.
///
/// Removing an array element shifts the following elements down by one.
pub fn remove(tree: &mut Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return None;
    }
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (get_mut(tree, parent)?, last),
        None => (tree, path),
    };
    match (parse_segment(last), parent) {
        (Segment::Index(i), Value::Array(items)) if i < items.len() => Some(items.remove(i)),
        (Segment::Key(k), Value::Map(entries)) => entries.remove(k),
        _ => None,
    }
}

fn is_writable(node: &Value, segments: &[Segment<'_>]) -> bool {
    let Some((&head, rest)) = segments.split_first() else {
        return true;
    };
    let child = match (head, node) {
        (Segment::Unaddressable, _) => return false,
        // Missing container: everything below gets created.
        (_, Value::Null) => return rest.iter().all(|s| s.is_addressable()),
        (Segment::Index(i), Value::Array(items)) => items.get(i),
        (Segment::Key(k), Value::Map(entries)) => entries.get(k),
        _ => return false,
    };
    match child {
        None => rest.iter().all(|s| s.is_addressable()),
        Some(_) if rest.is_empty() => true,
        Some(child) => is_writable(child, rest),
    }
}

fn write(node: &mut Value, segments: &[Segment<'_>], value: Value) {
    let Some((&head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if node.is_null() {
        *node = head.empty_container();
    }
    let slot = match (head, node) {
        (Segment::Index(i), Value::Array(items)) => {
            if items.len() <= i {
                items.resize(i + 1, Value::Null);
            }
            &mut items[i]
        }
        (Segment::Key(k), Value::Map(entries)) => {
            entries.entry(k.to_string()).or_insert(Value::Null)
        }
        // is_writable rejected every other combination.
        _ => return,
    };
    write(slot, rest, value);
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn tree(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    // ---- get ----

    #[test]
    fn get_nested_key_and_index() {
        let t = tree(json!({"addresses": [{"street": "Main"}, {"street": "Elm"}]}));
        assert_eq!(get(&t, "addresses.1.street"), Some(&Value::from("Elm")));
    }

    #[test]
    fn get_missing_returns_none() {
        let t = tree(json!({"a": {"b": 1}}));
        assert_eq!(get(&t, "a.c"), None);
        assert_eq!(get(&t, "x.y.z"), None);
    }

    #[test]
    fn get_through_null_returns_none() {
        let t = tree(json!({"a": null}));
        assert_eq!(get(&t, "a.b"), None);
        assert_eq!(get(&t, "a"), Some(&Value::Null));
    }

    #[test]
    fn get_type_mismatch_returns_none() {
        let t = tree(json!({"list": [1, 2], "obj": {"0": "zero"}}));
        assert_eq!(get(&t, "list.key"), None);
        // Numeric segment on an object is an index, not a key.
        assert_eq!(get(&t, "obj.0"), None);
        assert_eq!(get(&t, "list.0.deeper"), None);
    }

    #[test]
    fn get_empty_path_returns_none() {
        let t = tree(json!({"": 1}));
        assert_eq!(get(&t, ""), None);
    }

    #[test]
    fn get_non_integer_index_returns_none() {
        let t = tree(json!({"list": [1, 2]}));
        assert_eq!(get(&t, "list.-1"), None);
        assert_eq!(get(&t, "list.0.5"), None);
        assert_eq!(get(&t, "list.1.5"), None);
    }

    // ---- set ----

    #[test]
    fn set_creates_object_intermediates() {
        let t = set(&Value::empty_map(), "a.b.c", Value::from(1));
        assert_eq!(t, tree(json!({"a": {"b": {"c": 1}}})));
    }

    #[test]
    fn set_creates_array_for_numeric_segment() {
        let t = set(&Value::empty_map(), "addresses.0.street", Value::from("Main"));
        assert_eq!(t, tree(json!({"addresses": [{"street": "Main"}]})));
    }

    #[test]
    fn set_pads_array_with_null() {
        let t = set(&tree(json!({"xs": []})), "xs.2", Value::from(true));
        assert_eq!(t, tree(json!({"xs": [null, null, true]})));
    }

    #[test]
    fn set_replaces_null_intermediate() {
        let t = set(&tree(json!({"a": null})), "a.b", Value::from("x"));
        assert_eq!(t, tree(json!({"a": {"b": "x"}})));
    }

    #[test]
    fn set_wrong_container_kind_is_noop() {
        let original = tree(json!({"a": {"b": 1}, "s": "text"}));

        let mut t = original.clone();
        assert!(!set_mut(&mut t, "a.0", Value::from(2)));
        assert!(!set_mut(&mut t, "s.x", Value::from(2)));
        assert!(!set_mut(&mut t, "a.b.c", Value::from(2)));
        assert_eq!(t, original);
    }

    #[test]
    fn refused_write_leaves_no_partial_containers() {
        let original = tree(json!({"a": {"b": "leaf"}}));
        let mut t = original.clone();
        // "a.new" would be created, but "-1" is refused afterwards.
        assert!(!set_mut(&mut t, "a.new.-1", Value::from(1)));
        assert_eq!(t, original);
    }

    #[test]
    fn set_empty_path_is_noop() {
        let original = tree(json!({"a": 1}));
        let mut t = original.clone();
        assert!(!set_mut(&mut t, "", Value::from(2)));
        assert_eq!(t, original);
    }

    #[test]
    fn set_does_not_mutate_input() {
        let original = tree(json!({"a": {"b": 1}}));
        let next = set(&original, "a.b", Value::from(2));
        assert_eq!(get(&original, "a.b"), Some(&Value::from(1)));
        assert_eq!(get(&next, "a.b"), Some(&Value::from(2)));
    }

    #[test]
    fn set_index_beyond_limit_is_noop() {
        let mut t = Value::empty_map();
        assert!(!set_mut(&mut t, "xs.100000", Value::from(1)));
        assert_eq!(t, Value::empty_map());
    }

    // ---- remove ----

    #[test]
    fn remove_array_item_shifts_down() {
        let mut t = tree(json!({"xs": [{"v": 0}, {"v": 1}, {"v": 2}]}));
        assert_eq!(remove(&mut t, "xs.1"), Some(tree(json!({"v": 1}))));
        assert_eq!(get(&t, "xs.1.v"), Some(&Value::from(2)));
        assert_eq!(get(&t, "xs.2"), None);
    }

    #[test]
    fn remove_object_key() {
        let mut t = tree(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(remove(&mut t, "a.b"), Some(Value::from(1)));
        assert_eq!(t, tree(json!({"a": {"c": 2}})));
    }

    #[test]
    fn remove_out_of_range_returns_none() {
        let mut t = tree(json!({"xs": [1]}));
        assert_eq!(remove(&mut t, "xs.3"), None);
        assert_eq!(remove(&mut t, "missing.0"), None);
    }

    #[test]
    fn join_paths() {
        assert_eq!(join("", "name"), "name");
        assert_eq!(join("addresses", 0), "addresses.0");
        assert!(is_index_segment("3"));
        assert!(!is_index_segment("street"));
    }

    // ---- properties ----

    fn segment_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,4}".prop_map(|s| s),
            (0usize..4).prop_map(|i| i.to_string()),
        ]
    }

    fn path_strategy() -> impl Strategy<Value = String> {
        ("[a-z]{1,4}", proptest::collection::vec(segment_strategy(), 0..4)).prop_map(
            |(first, rest)| {
                let mut parts = vec![first];
                parts.extend(rest);
                parts.join(".")
            },
        )
    }

    fn leaf_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-zA-Z0-9 ]{0,8}".prop_map(Value::String),
        ]
    }

    proptest! {
        #[test]
        fn round_trip_on_fresh_tree(path in path_strategy(), value in leaf_strategy()) {
            let t = set(&Value::empty_map(), &path, value.clone());
            prop_assert_eq!(get(&t, &path), Some(&value));
        }

        #[test]
        fn round_trip_after_prior_writes(
            prior in proptest::collection::vec((path_strategy(), leaf_strategy()), 0..6),
            path in path_strategy(),
            value in leaf_strategy(),
        ) {
            let mut t = Value::empty_map();
            for (p, v) in prior {
                set_mut(&mut t, &p, v);
            }
            let before = t.clone();
            if set_mut(&mut t, &path, value.clone()) {
                prop_assert_eq!(get(&t, &path), Some(&value));
            } else {
                prop_assert_eq!(t, before);
            }
        }
    }
}
