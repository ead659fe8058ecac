// formsync CLI - paste import and autosaved record persistence

mod exit_codes;
mod paste;
mod record;

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use formsync_config::{ConfigError, Settings};
use formsync_store::{BackendError, SqliteBackend, SqliteStore, TableOptions};
use tracing_subscriber::EnvFilter;

use exit_codes::{
    EXIT_BATCH_PARTIAL, EXIT_CONFIG, EXIT_ERROR, EXIT_PARSE_MISMATCH, EXIT_SAVE_FAILED, EXIT_SUCCESS, EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "formsync")]
#[command(about = "Parse pasted spreadsheet ranges and persist form records")]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("FORMSYNC_COMMIT"), ")"))]
#[command(version)]
struct Cli {
    /// SQLite database (defaults to store.database from the config)
    #[arg(long, global = true, env = "FORMSYNC_DB")]
    db: Option<PathBuf>,

    /// Config file (defaults to <config dir>/formsync/config.toml)
    #[arg(long, global = true, env = "FORMSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Create tables without the (entity_id, record_kind) unique index
    #[arg(long, global = true)]
    no_unique_key: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse pasted text (TSV or CSV) and print the grid
    #[command(after_help = "\
Examples:
  pbpaste | formsync parse --columns 3
  formsync parse range.tsv --output tsv
  formsync parse ragged.csv --columns 4 --allow-variable-rows")]
    Parse {
        /// Input file, or - for stdin
        file: Option<PathBuf>,

        /// Required cells per row
        #[arg(long)]
        columns: Option<usize>,

        /// Pad or truncate rows to --columns instead of failing
        #[arg(long)]
        allow_variable_rows: bool,

        #[arg(long, value_enum, default_value = "json")]
        output: OutputFormat,
    },

    /// Parse pasted text and replace the rows stored under a key
    #[command(after_help = "\
Examples:
  formsync import revenue.tsv --entity sub-42 --kind revenue --schema year,amount:number
  pbpaste | formsync import - --entity sub-42 --kind staff --columns 5 --chunk-size 100")]
    Import {
        /// Input file, or - for stdin
        file: PathBuf,

        #[arg(long)]
        entity: String,

        #[arg(long)]
        kind: String,

        /// Required cells per row (implied by --schema)
        #[arg(long)]
        columns: Option<usize>,

        /// Column layout, e.g. year:number,amount:number,note
        #[arg(long)]
        schema: Option<String>,

        /// Rows per insert (defaults to batch.chunk_size)
        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        allow_variable_rows: bool,
    },

    /// Save one JSON payload as the record for a key
    Save {
        #[arg(long)]
        entity: String,

        #[arg(long)]
        kind: String,

        /// JSON file, or - for stdin
        file: Option<PathBuf>,
    },

    /// Print the stored payload for a key
    Show {
        #[arg(long)]
        entity: String,

        #[arg(long)]
        kind: String,
    },

    /// Autosave JSON values read line by line from stdin
    #[command(after_help = "\
Each stdin line is one complete JSON value. Changes are saved once input
pauses for the debounce delay; the pending value is saved at end of input.
Status transitions are printed to stdout, one per line.")]
    Watch {
        #[arg(long)]
        entity: String,

        #[arg(long)]
        kind: String,

        /// Debounce delay (defaults to autosave.delay_ms)
        #[arg(long)]
        delay_ms: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Tsv,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = Context::load(&cli).and_then(|ctx| match cli.command {
        Commands::Parse {
            file,
            columns,
            allow_variable_rows,
            output,
        } => paste::cmd_parse(&ctx, file, columns, allow_variable_rows, output),
        Commands::Import {
            file,
            entity,
            kind,
            columns,
            schema,
            chunk_size,
            allow_variable_rows,
        } => paste::cmd_import(&ctx, file, entity, kind, columns, schema, chunk_size, allow_variable_rows),
        Commands::Save { entity, kind, file } => record::cmd_save(&ctx, entity, kind, file),
        Commands::Show { entity, kind } => record::cmd_show(&ctx, entity, kind),
        Commands::Watch { entity, kind, delay_ms } => record::cmd_watch(&ctx, entity, kind, delay_ms),
    });

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// Log to stderr, filtered by FORMSYNC_LOG (default: warn).
fn init_logging() {
    let filter = EnvFilter::try_from_env("FORMSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn error(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn mismatch(msg: impl Into<String>) -> Self {
        Self { code: EXIT_PARSE_MISMATCH, message: msg.into(), hint: None }
    }

    pub fn save(msg: impl Into<String>) -> Self {
        Self { code: EXIT_SAVE_FAILED, message: msg.into(), hint: None }
    }

    pub fn partial(msg: impl Into<String>) -> Self {
        Self { code: EXIT_BATCH_PARTIAL, message: msg.into(), hint: None }
    }

    pub fn config(err: ConfigError) -> Self {
        Self { code: EXIT_CONFIG, message: err.to_string(), hint: None }
    }

    pub fn backend(err: BackendError) -> Self {
        Self::error(format!("store: {}", err))
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Settings and store location shared by every command.
pub struct Context {
    pub settings: Settings,
    pub db: PathBuf,
    pub unique_key: bool,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self, CliError> {
        let settings = match &cli.config {
            Some(path) => Settings::load_from(path).map_err(CliError::config)?,
            None => Settings::load(),
        };
        let db = cli.db.clone().unwrap_or_else(|| settings.store.database_path());
        let unique_key = settings.store.unique_key && !cli.no_unique_key;
        Ok(Self { settings, db, unique_key })
    }

    fn open(&self) -> Result<SqliteStore, CliError> {
        if let Some(parent) = self.db.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CliError::error(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        SqliteStore::open(&self.db).map_err(|e| {
            CliError::backend(e).with_hint(format!("database: {}", self.db.display()))
        })
    }

    fn table(&self, name: &str) -> Result<SqliteBackend, CliError> {
        let options = TableOptions { unique_key: self.unique_key };
        self.open()?.collection(name, options).map_err(CliError::backend)
    }

    /// Collection holding one record per key
    pub fn records(&self) -> Result<SqliteBackend, CliError> {
        self.table(&self.settings.store.records_table)
    }

    /// Collection holding imported rows, many per key
    pub fn rows(&self) -> Result<SqliteBackend, CliError> {
        self.table(&self.settings.store.rows_table)
    }
}

/// Read a whole input file, or stdin for `None` / `-`.
pub fn read_input(file: Option<&Path>) -> Result<String, CliError> {
    let mut text = String::new();
    match file {
        None => read_stdin(&mut text)?,
        Some(path) if path == Path::new("-") => read_stdin(&mut text)?,
        Some(path) => {
            text = std::fs::read_to_string(path)
                .map_err(|e| CliError::usage(format!("cannot read {}: {}", path.display(), e)))?;
        }
    }
    Ok(text)
}

fn read_stdin(buf: &mut String) -> Result<(), CliError> {
    io::stdin()
        .read_to_string(buf)
        .map(|_| ())
        .map_err(|e| CliError::usage(format!("cannot read stdin: {}", e)))
}
