//! Conditional visibility of schema fields.
//!
//! [`is_visible`] judges a single field against the value tree. A field
//! nested under a hidden group or repeater is hidden as well; the walker gets
//! that for free by not descending, and [`is_path_visible`] checks the whole
//! ancestor chain for code that starts from a value path (blur validation).

use crate::path;
use crate::schema::{FieldSchema, FormSchema, Operator};
use crate::types::Value;

/// Whether `field` is visible given the current `values`.
///
/// - no rule: visible
/// - `equals`: the value at `fieldId` strictly equals the rule value
///   (a missing value equals nothing)
/// - `greaterThan`: both sides numeric and the resolved value is larger;
///   anything else is hidden
/// - unknown operator: visible
#[must_use]
pub fn is_visible(field: &FieldSchema, values: &Value) -> bool {
    let Some(rule) = &field.visible_if else {
        return true;
    };
    let target = path::get(values, &rule.field_id);
    match rule.operator {
        Operator::Equals => target == Some(&rule.value),
        Operator::GreaterThan => match (target.and_then(Value::as_f64), rule.value.as_f64()) {
            (Some(actual), Some(threshold)) => actual > threshold,
            _ => false,
        },
        Operator::Unknown => true,
    }
}

/// Whether the field at `value_path` and every group/repeater enclosing it
/// is visible. Paths that name no field are reported as hidden.
#[must_use]
pub fn is_path_visible(schema: &FormSchema, value_path: &str, values: &Value) -> bool {
    let Some(located) = schema.locate(value_path) else {
        return false;
    };
    located
        .ancestors
        .iter()
        .chain(std::iter::once(&located.field))
        .all(|field| is_visible(field, values))
}
