//! `formsync-store` — record persistence for autosaved form state.
//!
//! A [`Reconciler`] keeps one record per `(entity_id, record_kind)` even when
//! the backend has no unique constraint for it. Large row sets go through
//! [`batch::replace_rows`], which writes bounded chunks one at a time.

pub mod backend;
pub mod batch;
pub mod error;
pub mod memory;
pub mod reconcile;
pub mod sqlite;

pub use backend::{Backend, Field, Filter, Record, RecordKey};
pub use batch::{replace_rows, write_all, write_all_with_progress, Progress};
pub use error::{BackendError, BatchError, SaveError};
pub use memory::{MemoryBackend, Operation};
pub use reconcile::{is_missing_unique_constraint, Reconciler, SaveOutcome};
pub use sqlite::{SqliteBackend, SqliteStore, TableOptions};
