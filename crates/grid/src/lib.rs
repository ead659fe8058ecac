//! `formsync-grid` — turns pasted spreadsheet text into a grid of cells.
//!
//! Pure parsing crate: no IO, no persistence. Callers map the grid into
//! their own rows (see [`schema::RowSchema`]) before handing them to the
//! autosave pipeline.

pub mod number;
pub mod parse;
pub mod schema;

pub use number::{to_number_strict, to_number_strict_opt};
pub use parse::{detect_dialect, parse_grid, Dialect, Grid, ParseError, ParseOptions, ParseResult};
pub use schema::{ColumnKind, ColumnSpec, RowSchema, SchemaError};
