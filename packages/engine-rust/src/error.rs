/// Errors returned by form session operations.
///
/// None of these are fatal to the form: each reports a rejected request and
/// leaves state untouched.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no field at path: {path}")]
    UnknownField { path: String },
    #[error("field at {path} is a {kind}, not a repeater")]
    NotARepeater { path: String, kind: &'static str },
    #[error("repeater {path} already holds the maximum of {max} items")]
    RepeaterFull { path: String, max: usize },
    #[error("repeater {path} already holds the minimum of {min} items")]
    RepeaterAtMinimum { path: String, min: usize },
    #[error("repeater {path} has no item {index}")]
    ItemOutOfRange { path: String, index: usize },
    #[error("value at {path} is a {found}, not a list")]
    ShapeMismatch { path: String, found: &'static str },
    #[error("no conflict is pending")]
    NoPendingConflict,
    #[error("form session has been unmounted")]
    Unmounted,
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Errors from decoding a persisted snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot has no values")]
    MissingValues,
    #[error("snapshot values are a {kind}, not an object")]
    NotAnObject { kind: &'static str },
}
