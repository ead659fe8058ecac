// In-process backend with optional unique key and failure injection

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::{matches_all, Backend, Filter, Record, RecordKey};
use crate::error::BackendError;

/// Backend calls, as recorded by [`MemoryBackend::calls`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Upsert,
    Update,
    Insert,
    Delete,
}

#[derive(Default)]
struct State {
    records: Vec<Record>,
    calls: Vec<Operation>,
    failures: HashMap<Operation, BackendError>,
    /// Successful insert calls left before inserts start failing
    insert_budget: Option<usize>,
    /// Time an upsert waits after applying before it reports success
    upsert_ack_delay: Duration,
}

/// Collection held in memory. Clones share the same records.
#[derive(Clone)]
pub struct MemoryBackend {
    collection: String,
    unique_key: bool,
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    /// Collection that enforces one record per `(entity_id, record_kind)`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            unique_key: true,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Collection without a uniqueness guarantee: upserts are rejected the way
    /// Postgres rejects an ON CONFLICT target with no matching constraint.
    pub fn without_unique_key(collection: impl Into<String>) -> Self {
        Self {
            unique_key: false,
            ..Self::new(collection)
        }
    }

    /// Make every call of `op` fail with `error` until cleared.
    pub fn fail_on(&self, op: Operation, error: BackendError) {
        self.state().failures.insert(op, error);
    }

    /// Let `successful` more insert calls through, then fail the rest.
    pub fn fail_inserts_after(&self, successful: usize) {
        self.state().insert_budget = Some(successful);
    }

    /// Apply upserts immediately but hold their acknowledgement for `delay`,
    /// like a write that commits and then answers over a slow link.
    pub fn delay_upsert_acks(&self, delay: Duration) {
        self.state().upsert_ack_delay = delay;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failures.clear();
        state.insert_budget = None;
    }

    pub fn records(&self) -> Vec<Record> {
        self.state().records.clone()
    }

    pub fn count(&self, key: &RecordKey) -> usize {
        self.state().records.iter().filter(|r| &r.key == key).count()
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.state().calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and return the injected failure, if any.
    fn begin(&self, op: Operation) -> Result<MutexGuard<'_, State>, BackendError> {
        let mut state = self.state();
        state.calls.push(op);
        match state.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn select(&self, filters: &[Filter]) -> Result<Vec<Record>, BackendError> {
        let state = self.begin(Operation::Select)?;
        Ok(state
            .records
            .iter()
            .filter(|r| matches_all(filters, &r.key))
            .cloned()
            .collect())
    }

    async fn upsert(&self, records: &[Record]) -> Result<(), BackendError> {
        let ack_delay = {
            let mut state = self.begin(Operation::Upsert)?;
            if !self.unique_key {
                return Err(BackendError::with_code(
                    "42P10",
                    "there is no unique or exclusion constraint matching the ON CONFLICT specification",
                ));
            }
            for record in records {
                match state.records.iter_mut().find(|r| r.key == record.key) {
                    Some(existing) => existing.payload = record.payload.clone(),
                    None => state.records.push(record.clone()),
                }
            }
            state.upsert_ack_delay
        };
        if !ack_delay.is_zero() {
            smol::Timer::after(ack_delay).await;
        }
        Ok(())
    }

    async fn update(&self, payload: &Value, filters: &[Filter]) -> Result<usize, BackendError> {
        let mut state = self.begin(Operation::Update)?;
        let mut affected = 0;
        for record in state.records.iter_mut().filter(|r| matches_all(filters, &r.key)) {
            record.payload = payload.clone();
            affected += 1;
        }
        Ok(affected)
    }

    async fn insert(&self, records: &[Record]) -> Result<(), BackendError> {
        let mut state = self.begin(Operation::Insert)?;
        match state.insert_budget {
            Some(0) => return Err(BackendError::new("insert rejected: request limit reached")),
            Some(n) => state.insert_budget = Some(n - 1),
            None => {}
        }
        if self.unique_key {
            if let Some(dup) = records.iter().find(|r| state.records.iter().any(|e| e.key == r.key)) {
                return Err(BackendError::with_code(
                    "23505",
                    format!("duplicate key value violates unique constraint: {}", dup.key),
                ));
            }
        }
        state.records.extend(records.iter().cloned());
        Ok(())
    }

    async fn delete(&self, filters: &[Filter]) -> Result<usize, BackendError> {
        let mut state = self.begin(Operation::Delete)?;
        let before = state.records.len();
        state.records.retain(|r| !matches_all(filters, &r.key));
        Ok(before - state.records.len())
    }
}
