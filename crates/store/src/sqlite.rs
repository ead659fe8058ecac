// SQLite-backed collections

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;

use crate::backend::{Backend, Filter, Record, RecordKey};
use crate::error::BackendError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id TEXT NOT NULL,
    record_kind TEXT NOT NULL,
    payload TEXT NOT NULL,        -- JSON
    updated_at TEXT NOT NULL      -- RFC 3339
);
"#;

/// Table creation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    /// Create a unique index on `(entity_id, record_kind)`. Without it,
    /// upserts fail and callers must fall back to update-then-insert.
    pub unique_key: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self { unique_key: true }
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are allowed.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A SQLite database holding one table per collection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let conn = Connection::open(path.as_ref())?;
        log::debug!("opened store at {}", path.as_ref().display());
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Create `table` if missing and return a backend for it.
    ///
    /// An index created by an earlier call is left alone, so a table first
    /// opened with a unique key keeps it.
    pub fn collection(&self, table: &str, options: TableOptions) -> Result<SqliteBackend, BackendError> {
        if !is_valid_table_name(table) {
            return Err(BackendError::new(format!("invalid table name '{}'", table)));
        }

        let conn = lock(&self.conn);
        conn.execute_batch(&SCHEMA.replace("{table}", table))?;
        let index = if options.unique_key {
            format!("CREATE UNIQUE INDEX IF NOT EXISTS {table}_key ON {table} (entity_id, record_kind)")
        } else {
            format!("CREATE INDEX IF NOT EXISTS {table}_lookup ON {table} (entity_id, record_kind)")
        };
        conn.execute(&index, [])?;

        Ok(SqliteBackend {
            conn: Arc::clone(&self.conn),
            table: table.to_string(),
        })
    }
}

/// One table of a [`SqliteStore`]. Calls run on the blocking thread pool.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

impl SqliteBackend {
    async fn run<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T, BackendError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        smol::unblock(move || {
            let mut conn = lock(&conn);
            f(&mut conn, &table)
        })
        .await
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `WHERE` clause with anonymous placeholders, plus its parameters in order.
fn where_clause(filters: &[Filter]) -> (String, Vec<String>) {
    if filters.is_empty() {
        return (String::new(), Vec::new());
    }
    let terms: Vec<String> = filters.iter().map(|f| format!("{} = ?", f.field.column())).collect();
    let values = filters.iter().map(|f| f.value.clone()).collect();
    (format!(" WHERE {}", terms.join(" AND ")), values)
}

fn encode(payload: &Value) -> Result<String, BackendError> {
    serde_json::to_string(payload).map_err(|e| BackendError::new(format!("payload encode failed: {}", e)))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl Backend for SqliteBackend {
    fn collection(&self) -> &str {
        &self.table
    }

    async fn select(&self, filters: &[Filter]) -> Result<Vec<Record>, BackendError> {
        let (clause, values) = where_clause(filters);
        self.run(move |conn, table| {
            let sql = format!("SELECT entity_id, record_kind, payload FROM {table}{clause} ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                let entity_id: String = row.get(0)?;
                let record_kind: String = row.get(1)?;
                let payload: String = row.get(2)?;
                Ok((RecordKey::new(entity_id, record_kind), payload))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (key, payload) = row?;
                let payload = serde_json::from_str(&payload)
                    .map_err(|e| BackendError::new(format!("stored payload for {} is not JSON: {}", key, e)))?;
                records.push(Record::new(key, payload));
            }
            Ok(records)
        })
        .await
    }

    async fn upsert(&self, records: &[Record]) -> Result<(), BackendError> {
        let rows = records
            .iter()
            .map(|r| Ok((r.key.clone(), encode(&r.payload)?)))
            .collect::<Result<Vec<_>, BackendError>>()?;
        self.run(move |conn, table| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO {table} (entity_id, record_kind, payload, updated_at) VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(entity_id, record_kind) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at"
                ))?;
                let at = now();
                for (key, payload) in &rows {
                    stmt.execute(params![key.entity_id, key.record_kind, payload, at])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update(&self, payload: &Value, filters: &[Filter]) -> Result<usize, BackendError> {
        if filters.is_empty() {
            return Err(BackendError::new("refusing to update every record"));
        }
        let payload = encode(payload)?;
        let (clause, values) = where_clause(filters);
        self.run(move |conn, table| {
            let sql = format!("UPDATE {table} SET payload = ?, updated_at = ?{clause}");
            let params = [payload, now()].into_iter().chain(values);
            Ok(conn.execute(&sql, params_from_iter(params))?)
        })
        .await
    }

    async fn insert(&self, records: &[Record]) -> Result<(), BackendError> {
        let rows = records
            .iter()
            .map(|r| Ok((r.key.clone(), encode(&r.payload)?)))
            .collect::<Result<Vec<_>, BackendError>>()?;
        self.run(move |conn, table| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO {table} (entity_id, record_kind, payload, updated_at) VALUES (?1, ?2, ?3, ?4)"
                ))?;
                let at = now();
                for (key, payload) in &rows {
                    stmt.execute(params![key.entity_id, key.record_kind, payload, at])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, filters: &[Filter]) -> Result<usize, BackendError> {
        if filters.is_empty() {
            return Err(BackendError::new("refusing to delete every record"));
        }
        let (clause, values) = where_clause(filters);
        self.run(move |conn, table| {
            let sql = format!("DELETE FROM {table}{clause}");
            Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
        })
        .await
    }
}
