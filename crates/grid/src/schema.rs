// Mapping grid rows onto keyed records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::number::to_number_strict;
use crate::parse::{Grid, ParseOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    #[default]
    Text,
    /// Coerced with [`to_number_strict`]
    Number,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub key: String,
    #[serde(default)]
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn text(key: impl Into<String>) -> Self {
        Self { key: key.into(), kind: ColumnKind::Text }
    }

    pub fn number(key: impl Into<String>) -> Self {
        Self { key: key.into(), kind: ColumnKind::Number }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("schema has no columns")]
    Empty,
    #[error("column {position} has an empty key")]
    EmptyKey { position: usize },
    #[error("column '{key}': unknown kind '{kind}' (expected text or number)")]
    UnknownKind { key: String, kind: String },
    #[error("duplicate column key '{0}'")]
    DuplicateKey(String),
}

/// Ordered column layout of a pasted table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
    columns: Vec<ColumnSpec>,
}

impl RowSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self, SchemaError> {
        if columns.is_empty() {
            return Err(SchemaError::Empty);
        }
        for (idx, col) in columns.iter().enumerate() {
            if col.key.trim().is_empty() {
                return Err(SchemaError::EmptyKey { position: idx + 1 });
            }
            if columns[..idx].iter().any(|c| c.key == col.key) {
                return Err(SchemaError::DuplicateKey(col.key.clone()));
            }
        }
        Ok(Self { columns })
    }

    /// Build a schema from `key[:kind],key[:kind],...`, e.g.
    /// `year:number,amount:number,note`. Kind defaults to text.
    pub fn parse_spec(spec: &str) -> Result<Self, SchemaError> {
        let mut columns = Vec::new();
        for part in spec.split(',').filter(|p| !p.trim().is_empty()) {
            let (key, kind) = match part.split_once(':') {
                Some((key, kind)) => (key.trim(), kind.trim()),
                None => (part.trim(), "text"),
            };
            let kind = match kind.to_ascii_lowercase().as_str() {
                "text" | "string" => ColumnKind::Text,
                "number" | "num" => ColumnKind::Number,
                _ => {
                    return Err(SchemaError::UnknownKind {
                        key: key.to_string(),
                        kind: kind.to_string(),
                    })
                }
            };
            columns.push(ColumnSpec { key: key.to_string(), kind });
        }
        Self::new(columns)
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Parse options that enforce this schema's width.
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions::new().expect_columns(self.width())
    }

    /// Map one row. Missing cells read as empty, extra cells are ignored.
    pub fn map_row(&self, row: &[String]) -> Map<String, Value> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let cell = row.get(idx).map(String::as_str).unwrap_or("");
                let value = match col.kind {
                    ColumnKind::Text => Value::String(cell.to_string()),
                    ColumnKind::Number => Value::from(to_number_strict(cell)),
                };
                (col.key.clone(), value)
            })
            .collect()
    }

    pub fn map_grid(&self, grid: &Grid) -> Vec<Value> {
        grid.iter().map(|row| Value::Object(self.map_row(row))).collect()
    }
}
