// Chunked sequential writes with cumulative progress

use std::future::Future;

use serde::Serialize;
use serde_json::Value;

use crate::backend::{Backend, Record, RecordKey};
use crate::error::{BackendError, BatchError};

/// Cumulative progress of a chunked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        }
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.done, self.total)
    }
}

/// Write `rows` in chunks of at most `chunk_size`, one chunk at a time.
pub async fn write_all<'a, R, E, F, Fut>(rows: &'a [R], chunk_size: usize, writer: F) -> Result<usize, BatchError<E>>
where
    F: FnMut(&'a [R]) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    write_all_with_progress(rows, chunk_size, writer, |_| {}).await
}

/// Like [`write_all`], calling `on_progress` after every completed chunk.
///
/// Chunk `n + 1` is not started until chunk `n` has resolved. A failed chunk
/// stops the write; earlier chunks stay written and are not retried.
pub async fn write_all_with_progress<'a, R, E, F, Fut, P>(
    rows: &'a [R],
    chunk_size: usize,
    mut writer: F,
    mut on_progress: P,
) -> Result<usize, BatchError<E>>
where
    F: FnMut(&'a [R]) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    P: FnMut(Progress),
{
    if chunk_size == 0 {
        return Err(BatchError::InvalidChunkSize);
    }

    let total = rows.len();
    let mut written = 0;
    for chunk in rows.chunks(chunk_size) {
        if let Err(source) = writer(chunk).await {
            log::warn!("batch write stopped at {}/{} rows", written, total);
            return Err(BatchError::Partial { written, total, source });
        }
        written += chunk.len();
        log::debug!("batch: {}/{} rows written", written, total);
        on_progress(Progress {
            done: written.min(total),
            total,
        });
    }
    Ok(written)
}

/// Replace every row stored under `key` with `rows`.
///
/// Existing rows are deleted first, then the new ones are inserted in
/// sequential chunks. A failure after the delete leaves the key partially
/// written; nothing is restored.
pub async fn replace_rows<B, P>(
    backend: &B,
    key: &RecordKey,
    rows: &[Value],
    chunk_size: usize,
    on_progress: P,
) -> Result<usize, BatchError<BackendError>>
where
    B: Backend + ?Sized,
    P: FnMut(Progress),
{
    if chunk_size == 0 {
        return Err(BatchError::InvalidChunkSize);
    }

    let total = rows.len();
    let removed = backend
        .delete(&key.filters())
        .await
        .map_err(|source| BatchError::Partial { written: 0, total, source })?;
    log::debug!("replace {}: removed {} rows from {}", key, removed, backend.collection());

    let records: Vec<Record> = rows.iter().map(|row| Record::new(key.clone(), row.clone())).collect();
    let written = write_all_with_progress(&records, chunk_size, |chunk| backend.insert(chunk), on_progress).await?;
    log::info!("replace {}: wrote {} rows to {}", key, written, backend.collection());
    Ok(written)
}
