use thiserror::Error;

/// Error reported by a storage backend.
///
/// `message` is the backend's human-readable diagnostic; `code` carries a
/// machine-readable code (SQLSTATE, SQLite extended code) when one exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    pub code: Option<String>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(e, _) => Some(e.extended_code.to_string()),
            _ => None,
        };
        Self { message: err.to_string(), code }
    }
}

/// A save that could not be completed.
#[derive(Debug, Error)]
pub enum SaveError {
    /// The upsert failed for a reason other than a missing unique constraint.
    #[error("save failed: {0}")]
    Backend(BackendError),
    /// The upsert hit a missing constraint and the update-then-insert fallback
    /// failed as well.
    #[error("save failed after fallback: {insert} (upsert: {upsert})")]
    Fallback {
        upsert: BackendError,
        update: Option<BackendError>,
        insert: BackendError,
    },
    #[error("payload could not be encoded: {0}")]
    Serialize(String),
}

impl SaveError {
    /// The error to show next to the save indicator.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            SaveError::Backend(e) => Some(e),
            SaveError::Fallback { insert, .. } => Some(insert),
            SaveError::Serialize(_) => None,
        }
    }
}

/// A chunked write that did not finish.
#[derive(Debug, Error)]
pub enum BatchError<E> {
    #[error("chunk size must be at least 1")]
    InvalidChunkSize,
    /// Rows before `written` are stored; the rest are not. Nothing is rolled back.
    #[error("batch write stopped after {written} of {total} rows: {source}")]
    Partial {
        written: usize,
        total: usize,
        #[source]
        source: E,
    },
}

impl<E> BatchError<E> {
    pub fn written(&self) -> usize {
        match self {
            BatchError::InvalidChunkSize => 0,
            BatchError::Partial { written, .. } => *written,
        }
    }
}
