// Storage backend contract: one named collection of keyed JSON records.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendError;

/// Composite identity of a persisted record, e.g. a submission and a sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub entity_id: String,
    pub record_kind: String,
}

impl RecordKey {
    pub fn new(entity_id: impl Into<String>, record_kind: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            record_kind: record_kind.into(),
        }
    }

    /// Filters that select exactly this key.
    pub fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::eq(Field::EntityId, &self.entity_id),
            Filter::eq(Field::RecordKind, &self.record_kind),
        ]
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.record_kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    pub key: RecordKey,
    pub payload: Value,
}

impl Record {
    pub fn new(key: RecordKey, payload: Value) -> Self {
        Self { key, payload }
    }
}

/// Filterable record columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    EntityId,
    RecordKind,
}

impl Field {
    pub fn column(self) -> &'static str {
        match self {
            Field::EntityId => "entity_id",
            Field::RecordKind => "record_kind",
        }
    }

    pub fn get(self, key: &RecordKey) -> &str {
        match self {
            Field::EntityId => &key.entity_id,
            Field::RecordKind => &key.record_kind,
        }
    }
}

/// Equality predicate on one key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: Field,
    pub value: String,
}

impl Filter {
    pub fn eq(field: Field, value: impl Into<String>) -> Self {
        Self { field, value: value.into() }
    }

    pub fn matches(&self, key: &RecordKey) -> bool {
        self.field.get(key) == self.value
    }
}

/// True when every filter matches. An empty filter list matches everything.
pub fn matches_all(filters: &[Filter], key: &RecordKey) -> bool {
    filters.iter().all(|f| f.matches(key))
}

/// A named collection of records.
///
/// Every call is a suspension point. Implementations give no ordering
/// guarantee between calls issued from different tasks.
#[async_trait]
pub trait Backend: Send + Sync {
    fn collection(&self) -> &str;

    /// Records matching all filters, oldest first.
    async fn select(&self, filters: &[Filter]) -> Result<Vec<Record>, BackendError>;

    /// Insert-or-replace with `(entity_id, record_kind)` as the conflict key.
    /// Fails when the collection has no uniqueness guarantee for that key.
    async fn upsert(&self, records: &[Record]) -> Result<(), BackendError>;

    /// Replace the payload of matching records. Returns the affected count.
    async fn update(&self, payload: &Value, filters: &[Filter]) -> Result<usize, BackendError>;

    async fn insert(&self, records: &[Record]) -> Result<(), BackendError>;

    /// Returns the removed count.
    async fn delete(&self, filters: &[Filter]) -> Result<usize, BackendError>;

    /// Most recently written record matching the filters.
    async fn select_latest(&self, filters: &[Filter]) -> Result<Option<Record>, BackendError> {
        Ok(self.select(filters).await?.pop())
    }
}
