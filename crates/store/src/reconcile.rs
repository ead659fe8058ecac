// Record reconciliation: one upsert, or update-then-insert when the backend
// cannot enforce uniqueness of (entity_id, record_kind).

use serde::Serialize;
use serde_json::Value;

use crate::backend::{Backend, Record, RecordKey};
use crate::error::{BackendError, SaveError};

/// Postgres SQLSTATE for an ON CONFLICT target with no matching constraint.
pub const MISSING_CONSTRAINT_SQLSTATE: &str = "42P10";

/// Lowercase diagnostics meaning "no unique constraint covers the conflict key".
const MISSING_CONSTRAINT_PHRASES: &[&str] = &[
    "no unique or exclusion constraint",
    "does not match any primary key or unique constraint",
];

/// Whether a failed upsert means the backend has no uniqueness guarantee for
/// the conflict key (as opposed to any other failure).
///
/// Matching on message text is backend- and locale-specific; the SQLSTATE
/// check is preferred when the backend exposes one.
pub fn is_missing_unique_constraint(error: &BackendError) -> bool {
    if error.code.as_deref() == Some(MISSING_CONSTRAINT_SQLSTATE) {
        return true;
    }
    let message = error.message.to_lowercase();
    MISSING_CONSTRAINT_PHRASES.iter().any(|phrase| message.contains(phrase))
}

/// How a successful save reached the backend.
///
/// Every save is sent to the backend; there is no client-side "unchanged"
/// shortcut, since another writer (or an earlier save still in flight) may
/// have replaced the record since this process last wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    /// Primary path: the backend replaced the record in one write
    Upserted,
    /// Fallback path: existing row(s) updated
    Updated,
    /// Fallback path: no row existed, one was inserted
    Inserted,
}

impl SaveOutcome {
    /// True when the backend could not enforce the key and the save went
    /// through update/insert.
    pub fn fell_back(self) -> bool {
        !matches!(self, SaveOutcome::Upserted)
    }
}

impl std::fmt::Display for SaveOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveOutcome::Upserted => write!(f, "upserted"),
            SaveOutcome::Updated => write!(f, "updated"),
            SaveOutcome::Inserted => write!(f, "inserted"),
        }
    }
}

/// Keeps at most one record per key in a backend collection.
pub struct Reconciler<B> {
    backend: B,
}

impl<B: Backend> Reconciler<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Persist `payload` as the single record for `key`.
    ///
    /// Tries an upsert first. If the backend reports that no unique constraint
    /// covers the key, falls back to updating matching rows and inserting when
    /// none matched (or the update itself failed).
    pub async fn save(&self, key: &RecordKey, payload: &Value) -> Result<SaveOutcome, SaveError> {
        let record = Record::new(key.clone(), payload.clone());
        let outcome = match self.backend.upsert(std::slice::from_ref(&record)).await {
            Ok(()) => SaveOutcome::Upserted,
            Err(e) if is_missing_unique_constraint(&e) => {
                log::info!(
                    "save {}: {} has no unique key, falling back to update/insert",
                    key,
                    self.backend.collection()
                );
                self.update_then_insert(&record, e).await?
            }
            Err(e) => {
                log::warn!("save {}: upsert failed: {}", key, e);
                return Err(SaveError::Backend(e));
            }
        };

        log::debug!("save {}: {}", key, outcome);
        Ok(outcome)
    }

    /// Serialize `value` and [`save`](Self::save) it.
    pub async fn save_as<T: Serialize>(&self, key: &RecordKey, value: &T) -> Result<SaveOutcome, SaveError> {
        let payload = serde_json::to_value(value).map_err(|e| SaveError::Serialize(e.to_string()))?;
        self.save(key, &payload).await
    }

    /// Current payload stored for `key`, newest record first.
    pub async fn load(&self, key: &RecordKey) -> Result<Option<Value>, BackendError> {
        let record = self.backend.select_latest(&key.filters()).await?;
        Ok(record.map(|r| r.payload))
    }

    async fn update_then_insert(&self, record: &Record, upsert: BackendError) -> Result<SaveOutcome, SaveError> {
        let update = match self.backend.update(&record.payload, &record.key.filters()).await {
            Ok(affected) if affected > 0 => return Ok(SaveOutcome::Updated),
            Ok(_) => None,
            Err(e) => {
                log::debug!("save {}: fallback update failed: {}", record.key, e);
                Some(e)
            }
        };

        match self.backend.insert(std::slice::from_ref(record)).await {
            Ok(()) => Ok(SaveOutcome::Inserted),
            Err(insert) => {
                log::warn!("save {}: fallback insert failed: {}", record.key, insert);
                Err(SaveError::Fallback { upsert, update, insert })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, Operation};
    use serde_json::json;
    use smol::Timer;
    use std::sync::Arc;
    use std::time::Duration;

    fn key() -> RecordKey {
        RecordKey::new("sub-42", "revenue")
    }

    #[test]
    fn test_detects_missing_constraint() {
        assert!(is_missing_unique_constraint(&BackendError::new(
            "there is no unique or exclusion constraint matching the ON CONFLICT specification"
        )));
        assert!(is_missing_unique_constraint(&BackendError::new(
            "ON CONFLICT clause does not match any PRIMARY KEY or UNIQUE constraint"
        )));
        assert!(is_missing_unique_constraint(&BackendError::with_code("42P10", "whatever")));
        assert!(!is_missing_unique_constraint(&BackendError::new("permission denied for table records")));
        assert!(!is_missing_unique_constraint(&BackendError::with_code("23505", "duplicate key value")));
    }

    #[test]
    fn test_upsert_path() {
        smol::block_on(async {
            let reconciler = Reconciler::new(MemoryBackend::new("records"));
            let outcome = reconciler.save(&key(), &json!({"total": 1})).await.unwrap();
            assert_eq!(outcome, SaveOutcome::Upserted);

            let outcome = reconciler.save(&key(), &json!({"total": 2})).await.unwrap();
            assert_eq!(outcome, SaveOutcome::Upserted);
            assert_eq!(reconciler.backend().count(&key()), 1);
            assert_eq!(reconciler.load(&key()).await.unwrap(), Some(json!({"total": 2})));
        });
    }

    #[test]
    fn test_fallback_inserts_then_updates() {
        smol::block_on(async {
            let backend = MemoryBackend::without_unique_key("records");
            let reconciler = Reconciler::new(backend.clone());

            let outcome = reconciler.save(&key(), &json!({"total": 1})).await.unwrap();
            assert_eq!(outcome, SaveOutcome::Inserted);
            assert_eq!(
                backend.calls(),
                vec![Operation::Upsert, Operation::Update, Operation::Insert]
            );

            let outcome = reconciler.save(&key(), &json!({"total": 2})).await.unwrap();
            assert_eq!(outcome, SaveOutcome::Updated);
            assert_eq!(backend.count(&key()), 1);
            assert_eq!(reconciler.load(&key()).await.unwrap(), Some(json!({"total": 2})));
        });
    }

    #[test]
    fn test_failed_update_still_inserts() {
        smol::block_on(async {
            let backend = MemoryBackend::without_unique_key("records");
            backend.fail_on(Operation::Update, BackendError::new("update timed out"));
            let reconciler = Reconciler::new(backend.clone());

            let outcome = reconciler.save(&key(), &json!([1, 2])).await.unwrap();
            assert_eq!(outcome, SaveOutcome::Inserted);
            assert_eq!(backend.count(&key()), 1);
        });
    }

    #[test]
    fn test_fallback_failure_is_hard_failure() {
        smol::block_on(async {
            let backend = MemoryBackend::without_unique_key("records");
            backend.fail_on(Operation::Insert, BackendError::new("row violates policy"));
            let reconciler = Reconciler::new(backend.clone());

            let err = reconciler.save(&key(), &json!({})).await.unwrap_err();
            match &err {
                SaveError::Fallback { update, insert, .. } => {
                    assert!(update.is_none(), "update matched nothing but did not fail");
                    assert_eq!(insert.message, "row violates policy");
                }
                other => panic!("expected fallback failure, got {other:?}"),
            }
            assert_eq!(err.backend_error().map(|e| e.message.as_str()), Some("row violates policy"));
        });
    }

    #[test]
    fn test_other_upsert_errors_do_not_fall_back() {
        smol::block_on(async {
            let backend = MemoryBackend::new("records");
            backend.fail_on(Operation::Upsert, BackendError::new("permission denied"));
            let reconciler = Reconciler::new(backend.clone());

            let err = reconciler.save(&key(), &json!({})).await.unwrap_err();
            assert!(matches!(err, SaveError::Backend(_)));
            assert_eq!(backend.calls(), vec![Operation::Upsert]);
        });
    }

    #[test]
    fn test_repeated_payload_still_reaches_backend() {
        smol::block_on(async {
            let backend = MemoryBackend::new("records");
            let first = Reconciler::new(backend.clone());
            let other = Reconciler::new(backend.clone());

            first.save(&key(), &json!({"v": 0})).await.unwrap();
            other.save(&key(), &json!({"v": 5})).await.unwrap();
            let outcome = first.save(&key(), &json!({"v": 0})).await.unwrap();

            assert_eq!(outcome, SaveOutcome::Upserted);
            assert!(!outcome.fell_back());
            assert_eq!(backend.calls().len(), 3);
            assert_eq!(first.load(&key()).await.unwrap(), Some(json!({"v": 0})));
        });
    }

    #[test]
    fn test_save_during_slow_save_is_not_skipped() {
        smol::block_on(async {
            let backend = MemoryBackend::new("records");
            let reconciler = Arc::new(Reconciler::new(backend.clone()));
            reconciler.save(&key(), &json!({"v": 0})).await.unwrap();

            backend.delay_upsert_acks(Duration::from_millis(100));
            let slow = {
                let reconciler = Arc::clone(&reconciler);
                smol::spawn(async move { reconciler.save(&key(), &json!({"v": 1})).await })
            };
            Timer::after(Duration::from_millis(20)).await;
            backend.delay_upsert_acks(Duration::ZERO);

            // Same payload as the first save, but the record now holds {v: 1}
            let outcome = reconciler.save(&key(), &json!({"v": 0})).await.unwrap();
            assert_eq!(outcome, SaveOutcome::Upserted);
            assert_eq!(slow.await.unwrap(), SaveOutcome::Upserted);

            assert_eq!(backend.calls(), vec![Operation::Upsert; 3]);
            assert_eq!(reconciler.load(&key()).await.unwrap(), Some(json!({"v": 0})));
        });
    }

    #[test]
    fn test_failed_save_is_retried() {
        smol::block_on(async {
            let backend = MemoryBackend::new("records");
            backend.fail_on(Operation::Upsert, BackendError::new("offline"));
            let reconciler = Reconciler::new(backend.clone());
            assert!(reconciler.save(&key(), &json!(1)).await.is_err());

            backend.clear_failures();
            let outcome = reconciler.save(&key(), &json!(1)).await.unwrap();
            assert_eq!(outcome, SaveOutcome::Upserted);
        });
    }

    #[test]
    fn test_save_as_serializes() {
        #[derive(Serialize)]
        struct Revenue {
            year: u32,
            amount: f64,
        }

        smol::block_on(async {
            let reconciler = Reconciler::new(MemoryBackend::new("records"));
            reconciler
                .save_as(&key(), &Revenue { year: 2020, amount: 2500.5 })
                .await
                .unwrap();
            let stored = reconciler.load(&key()).await.unwrap().unwrap();
            assert_eq!(stored["year"], 2020);
            assert_eq!(stored["amount"], 2500.5);
        });
    }
}
