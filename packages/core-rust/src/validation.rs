//! Per-field validation.
//!
//! Sync rules run in a fixed order: `required`, then `minLength` (text fields
//! only). The first failure wins. The async path runs the sync rules first
//! and only consults the field's [`AsyncValidator`](crate::AsyncValidator) when
//! they pass. Failures of the async validator itself, whether an `Err` or a
//! panic, are reported as [`VALIDATION_FAILED`] and never propagate.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use crate::schema::{FieldKind, FieldSchema};
use crate::types::Value;

/// Message for a missing required value.
pub const REQUIRED_MESSAGE: &str = "This field is required";

/// Message used when an async validator errors or panics.
pub const VALIDATION_FAILED: &str = "Validation failed";

/// Message for a text value shorter than the configured minimum.
#[must_use]
pub fn min_length_message(min: usize) -> String {
    format!("Minimum length is {min}")
}

/// `true` for a missing value, `null`, or the empty string.
fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Runs the synchronous rule set. Returns the error message, if any.
#[must_use]
pub fn validate_sync(field: &FieldSchema, value: Option<&Value>) -> Option<String> {
    let rule = field.validation.as_ref()?;

    if rule.required && is_empty(value) {
        return Some(REQUIRED_MESSAGE.to_string());
    }

    if let (FieldKind::Text, Some(min), Some(Value::String(s))) = (&field.kind, rule.min_length, value) {
        if s.chars().count() < min {
            return Some(min_length_message(min));
        }
    }

    None
}

/// Runs the sync rules, then the field's async validator if it has one.
///
/// `values` is the whole tree, handed to the validator for cross-field checks.
pub async fn validate_async(
    field: &FieldSchema,
    value: Option<&Value>,
    values: &Value,
) -> Option<String> {
    if let Some(error) = validate_sync(field, value) {
        return Some(error);
    }
    let validator = field.async_validate.as_ref()?;
    let value = value.cloned().unwrap_or_default();

    match AssertUnwindSafe(validator.validate(&value, values))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            tracing::debug!(field = %field.id, error = %err, "async validator returned an error");
            Some(VALIDATION_FAILED.to_string())
        }
        Err(_) => {
            tracing::warn!(field = %field.id, "async validator panicked");
            Some(VALIDATION_FAILED.to_string())
        }
    }
}
