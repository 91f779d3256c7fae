//! `formsync` Core: value tree, path accessor, field schema, visibility and validation.

pub mod clock;
pub mod path;
pub mod schema;
pub mod traits;
pub mod types;
pub mod validation;
pub mod visibility;

pub use clock::{ClockSource, ManualClock, SaveClock, SystemClock};
pub use schema::{FieldKind, FieldSchema, FormSchema, Located, Operator, ValidationRule, VisibleIf};
pub use traits::{AsyncValidator, FnLoader, FnValidator, OptionLoader, SelectOption};
pub use types::Value;
pub use validation::{validate_async, validate_sync};
pub use visibility::{is_path_visible, is_visible};
