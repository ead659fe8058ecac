// parse / import commands

use std::io::Write;
use std::path::PathBuf;

use formsync_grid::{parse_grid, ParseOptions, ParseResult, RowSchema};
use formsync_store::{replace_rows, BatchError, RecordKey};
use serde_json::{json, Value};

use crate::{read_input, CliError, Context, OutputFormat};

fn parse_options(ctx: &Context, columns: Option<usize>, allow_variable_rows: bool) -> ParseOptions {
    let options = ParseOptions::new().allow_variable_rows(allow_variable_rows || ctx.settings.paste.allow_variable_rows);
    match columns {
        Some(n) => options.expect_columns(n),
        None => options,
    }
}

pub fn cmd_parse(
    ctx: &Context,
    file: Option<PathBuf>,
    columns: Option<usize>,
    allow_variable_rows: bool,
    output: OutputFormat,
) -> Result<(), CliError> {
    let text = read_input(file.as_deref())?;
    let result = parse_grid(&text, &parse_options(ctx, columns, allow_variable_rows));
    log::debug!("parsed {} rows as {}", result.row_count(), result.dialect);

    print_grid(&result, output)?;
    match result.error {
        Some(err) => Err(CliError::mismatch(err.to_string())),
        None => Ok(()),
    }
}

fn print_grid(result: &ParseResult, output: OutputFormat) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let written = match output {
        OutputFormat::Json => {
            let doc = json!({ "dialect": result.dialect, "rows": result.rows });
            let text = serde_json::to_string_pretty(&doc).map_err(|e| CliError::error(e.to_string()))?;
            writeln!(out, "{}", text)
        }
        OutputFormat::Tsv => result
            .rows
            .iter()
            .try_for_each(|row| writeln!(out, "{}", row.join("\t"))),
    };
    written.map_err(|e| CliError::error(format!("cannot write output: {}", e)))
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_import(
    ctx: &Context,
    file: PathBuf,
    entity: String,
    kind: String,
    columns: Option<usize>,
    schema: Option<String>,
    chunk_size: Option<usize>,
    allow_variable_rows: bool,
) -> Result<(), CliError> {
    let schema = schema
        .map(|spec| RowSchema::parse_spec(&spec))
        .transpose()
        .map_err(|e| CliError::usage(format!("--schema: {}", e)))?;
    let columns = match (&schema, columns) {
        (Some(s), Some(n)) if s.width() != n => {
            return Err(CliError::usage(format!(
                "--columns {} disagrees with --schema, which has {} columns",
                n,
                s.width()
            )));
        }
        (Some(s), _) => Some(s.width()),
        (None, n) => n,
    };
    let chunk_size = chunk_size.unwrap_or(ctx.settings.batch.chunk_size);

    let text = read_input(Some(&file))?;
    let parsed = parse_grid(&text, &parse_options(ctx, columns, allow_variable_rows));
    if let Some(err) = parsed.error {
        // Nothing is written for a rejected paste
        return Err(CliError::mismatch(err.to_string()).with_hint("fix the pasted range or pass --allow-variable-rows"));
    }

    let rows: Vec<Value> = match &schema {
        Some(schema) => schema.map_grid(&parsed.rows),
        None => parsed.rows.iter().map(|row| json!(row)).collect(),
    };

    let key = RecordKey::new(entity, kind);
    let backend = ctx.rows()?;
    let written = smol::block_on(replace_rows(&backend, &key, &rows, chunk_size, |progress| {
        eprintln!("imported {} rows", progress);
    }))
    .map_err(|err| match err {
        BatchError::InvalidChunkSize => CliError::usage("--chunk-size must be at least 1"),
        BatchError::Partial { written, total, source } => CliError::partial(format!(
            "import of {} stopped after {} of {} rows: {}",
            key, written, total, source
        ))
        .with_hint("rows already written were kept; re-run the import to replace them"),
    })?;

    let summary = json!({
        "entity_id": key.entity_id,
        "record_kind": key.record_kind,
        "dialect": parsed.dialect,
        "rows": written,
    });
    println!("{}", summary);
    Ok(())
}
