//! `formsync` Engine: form state store, field tree walker, debounced persistence and cross-context conflict handling.

pub mod config;
pub mod error;
pub mod form;
pub mod options;
pub mod persistence;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod validation;
pub mod walker;

pub use config::EngineConfig;
pub use error::{EngineError, SnapshotError};
pub use form::FormSession;
pub use options::{OptionsState, LOAD_FAILED_MESSAGE};
pub use persistence::{Conflict, ConflictResolver, HydrationState, PersistenceHandle, Resolution};
pub use snapshot::PersistedSnapshot;
pub use storage::{ContextId, ContextStorage, SharedMemoryStorage, SnapshotStorage, StorageEvent};
pub use store::FormStore;
pub use walker::{RenderKind, RenderNode};
