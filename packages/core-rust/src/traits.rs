use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Value;

/// One entry of a select field's option list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Text shown to the user.
    pub label: String,
    /// Value written into the tree when chosen.
    pub value: String,
}

impl SelectOption {
    #[must_use]
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Externally supplied async check for a single field.
///
/// Receives the field's current value and the whole value tree. Returns
/// `Ok(Some(message))` when the value is rejected and `Ok(None)` when it
/// passes. An `Err` is reported to the user as a generic failure.
#[async_trait]
pub trait AsyncValidator: Send + Sync {
    async fn validate(&self, value: &Value, values: &Value) -> anyhow::Result<Option<String>>;
}

/// Externally supplied option source for a select field.
///
/// Not assumed idempotent: the engine calls it at most once per field mount.
#[async_trait]
pub trait OptionLoader: Send + Sync {
    async fn load(&self) -> anyhow::Result<Vec<SelectOption>>;
}

impl fmt::Debug for dyn AsyncValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncValidator")
    }
}

impl fmt::Debug for dyn OptionLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OptionLoader")
    }
}

/// Adapts an async closure into an [`AsyncValidator`].
///
/// The closure receives owned copies of the value and the tree so the
/// returned future can be `'static`.
pub struct FnValidator<F>(pub F);

#[async_trait]
impl<F, Fut> AsyncValidator for FnValidator<F>
where
    F: Fn(Value, Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send,
{
    async fn validate(&self, value: &Value, values: &Value) -> anyhow::Result<Option<String>> {
        (self.0)(value.clone(), values.clone()).await
    }
}

/// Adapts an async closure into an [`OptionLoader`].
pub struct FnLoader<F>(pub F);

#[async_trait]
impl<F, Fut> OptionLoader for FnLoader<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<SelectOption>>> + Send,
{
    async fn load(&self) -> anyhow::Result<Vec<SelectOption>> {
        (self.0)().await
    }
}
