// Clipboard paste parsing (TSV ranges from spreadsheets, CSV from text areas)

use serde::Serialize;
use thiserror::Error;

/// Ordered rows of string cells. Ragged unless a column count is enforced.
pub type Grid = Vec<Vec<String>>;

/// Field separator convention of a paste.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Tab-separated, no quoting (what spreadsheet apps put on the clipboard)
    Tab,
    /// Comma-separated with RFC 4180 style quoting
    #[default]
    Comma,
}

impl Dialect {
    pub fn delimiter(self) -> char {
        match self {
            Dialect::Tab => '\t',
            Dialect::Comma => ',',
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Tab => write!(f, "tab"),
            Dialect::Comma => write!(f, "comma"),
        }
    }
}

/// Detect the dialect of a whole paste.
///
/// A single tab anywhere makes the entire input tab-separated. The decision is
/// per input, not per line, so a paste that mixes both will misparse.
pub fn detect_dialect(text: &str) -> Dialect {
    if text.contains('\t') {
        Dialect::Tab
    } else {
        Dialect::Comma
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Required cells per row. `Some(0)` behaves like `None`.
    pub expected_columns: Option<usize>,
    /// Force-fit rows to `expected_columns` instead of reporting a mismatch
    pub allow_variable_rows: bool,
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_columns(mut self, columns: usize) -> Self {
        self.expected_columns = Some(columns);
        self
    }

    pub fn allow_variable_rows(mut self, allow: bool) -> Self {
        self.allow_variable_rows = allow;
        self
    }

    fn expected(&self) -> Option<usize> {
        self.expected_columns.filter(|&n| n > 0)
    }
}

/// Problems found in otherwise parseable input. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// `row` is 1-based, counted over non-blank lines.
    #[error("expected {expected} columns per row, but row {row} has {found}")]
    ColumnCount {
        expected: usize,
        row: usize,
        found: usize,
    },
}

/// Outcome of one paste.
///
/// `rows` always holds the best-effort parse, even when `error` is set, so the
/// caller can show the offending data for correction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseResult {
    pub rows: Grid,
    pub dialect: Dialect,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "error_text")]
    pub error: Option<ParseError>,
}

fn error_text<S: serde::Serializer>(error: &Option<ParseError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_str(&e.to_string()),
        None => s.serialize_none(),
    }
}

impl ParseResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Width of the widest row
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Parse pasted text into a grid of cells.
///
/// Never fails: malformed input is reported through [`ParseResult::error`].
pub fn parse_grid(text: &str, options: &ParseOptions) -> ParseResult {
    let normalized = text.replace('\u{00A0}', " ");
    if normalized.trim().is_empty() {
        return ParseResult::default();
    }

    // Deliberately not a plain trim: leading/trailing tabs are empty cells of
    // the pasted range, so "\tA\tB" keeps its first empty cell
    let normalized = normalized.trim_matches(is_blank);
    let dialect = detect_dialect(normalized);

    let mut rows: Grid = normalized
        .split('\n')
        .map(|line| line.replace('\r', ""))
        .filter(|line| !is_blank_line(line, dialect))
        .map(|line| split_line(&line, dialect))
        .collect();

    let mut error = None;
    if let Some(expected) = options.expected() {
        if options.allow_variable_rows {
            for row in &mut rows {
                row.resize(expected, String::new());
            }
        } else if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != expected) {
            log::debug!("paste: row {} has {} cells, expected {}", idx + 1, row.len(), expected);
            error = Some(ParseError::ColumnCount {
                expected,
                row: idx + 1,
                found: row.len(),
            });
        }
    }

    log::debug!("paste: parsed {} rows as {} separated", rows.len(), dialect);
    ParseResult { rows, dialect, error }
}

/// Whitespace that never forms a cell. Tabs are separators, not padding.
fn is_blank(c: char) -> bool {
    c.is_whitespace() && c != '\t'
}

/// A line with nothing but padding. In tab mode a line of tabs is a row of
/// empty cells and is kept.
fn is_blank_line(line: &str, dialect: Dialect) -> bool {
    match dialect {
        Dialect::Tab => line.chars().all(is_blank),
        Dialect::Comma => line.trim().is_empty(),
    }
}

fn split_line(line: &str, dialect: Dialect) -> Vec<String> {
    let delimiter = dialect.delimiter();
    let raw: Vec<String> = match dialect {
        Dialect::Tab => line.split(delimiter).map(str::to_string).collect(),
        Dialect::Comma => split_quoted(line, delimiter),
    };
    raw.iter().map(|cell| clean_cell(cell)).collect()
}

/// Split one delimited line honoring double-quoted fields.
/// Quoted fields may contain the delimiter and `""` escapes, but not newlines.
fn split_quoted(line: &str, delimiter: char) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter as u8)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(Ok(record)) => record.iter().map(str::to_string).collect(),
        _ => line.split(delimiter).map(str::to_string).collect(),
    }
}

/// Strip one layer of wrapping quotes and surrounding whitespace.
fn clean_cell(cell: &str) -> String {
    let trimmed = cell.trim();
    strip_wrapping_quotes(trimmed).trim().to_string()
}

fn strip_wrapping_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
