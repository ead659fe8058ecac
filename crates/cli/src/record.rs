// save / show / watch commands

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use formsync_autosave::{DebounceScheduler, SaveResult, SaveStatus, SchedulerOptions};
use formsync_store::{Reconciler, RecordKey, SaveError};
use serde_json::{json, Value};
use smol::io::{AsyncBufReadExt, BufReader};
use smol::stream::StreamExt;
use smol::future::FutureExt;
use smol::Timer;

use crate::{read_input, CliError, Context};

/// How often `watch` checks for status changes while stdin is quiet
const STATUS_POLL: Duration = Duration::from_millis(50);

fn save_error(key: &RecordKey, err: SaveError) -> CliError {
    let failed = CliError::save(format!("saving {}: {}", key, err));
    match err {
        SaveError::Fallback { .. } => failed.with_hint("the table has no unique key; both update and insert were rejected"),
        _ => failed,
    }
}

pub fn cmd_save(ctx: &Context, entity: String, kind: String, file: Option<PathBuf>) -> Result<(), CliError> {
    let text = read_input(file.as_deref())?;
    let payload: Value =
        serde_json::from_str(&text).map_err(|e| CliError::usage(format!("payload is not valid JSON: {}", e)))?;

    let key = RecordKey::new(entity, kind);
    let reconciler = Reconciler::new(ctx.records()?);
    let outcome = smol::block_on(reconciler.save(&key, &payload)).map_err(|e| save_error(&key, e))?;

    println!(
        "{}",
        json!({
            "entity_id": key.entity_id,
            "record_kind": key.record_kind,
            "outcome": outcome,
        })
    );
    Ok(())
}

pub fn cmd_show(ctx: &Context, entity: String, kind: String) -> Result<(), CliError> {
    let key = RecordKey::new(entity, kind);
    let reconciler = Reconciler::new(ctx.records()?);
    match smol::block_on(reconciler.load(&key)).map_err(CliError::backend)? {
        Some(payload) => {
            let text = serde_json::to_string_pretty(&payload).map_err(|e| CliError::error(e.to_string()))?;
            println!("{}", text);
            Ok(())
        }
        None => Err(CliError::error(format!("no record for {}", key))),
    }
}

/// Prints each status change once. Idle is never printed.
#[derive(Default)]
struct StatusLine {
    last: Option<SaveStatus>,
}

impl StatusLine {
    fn report(&mut self, status: &SaveStatus) {
        if matches!(status, SaveStatus::Idle) || self.last.as_ref() == Some(status) {
            return;
        }
        match status {
            SaveStatus::Failed { message } => println!("failed: {}", message),
            _ => println!("{}", status.name()),
        }
        self.last = Some(status.clone());
    }
}

pub fn cmd_watch(ctx: &Context, entity: String, kind: String, delay_ms: Option<u64>) -> Result<(), CliError> {
    let delay = match delay_ms {
        Some(0) => return Err(CliError::usage("--delay-ms must be greater than 0")),
        Some(ms) => Duration::from_millis(ms),
        None => ctx.settings.autosave.delay(),
    };
    let options = SchedulerOptions {
        delay,
        serialize_saves: ctx.settings.autosave.serialize_saves,
    };

    let key = RecordKey::new(entity, kind);
    let reconciler = Arc::new(Reconciler::new(ctx.records()?));
    let save_key = key.clone();
    let mut scheduler = DebounceScheduler::with_options(options, move |payload: Value| {
        let reconciler = Arc::clone(&reconciler);
        let key = save_key.clone();
        async move {
            let outcome = reconciler.save(&key, &payload).await?;
            log::info!("watch {}: {}", key, outcome);
            SaveResult::Ok(())
        }
    });

    smol::block_on(async {
        let mut lines = BufReader::new(smol::Unblock::new(std::io::stdin())).lines();
        let mut status = StatusLine::default();
        let mut line_no = 0usize;

        loop {
            let next = async { Some(lines.next().await) };
            let tick = async {
                Timer::after(STATUS_POLL).await;
                None
            };
            match next.or(tick).await {
                Some(Some(Ok(line))) => {
                    line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(&line) {
                        Ok(value) => {
                            scheduler.observe(value);
                        }
                        Err(e) => eprintln!("line {}: not valid JSON, ignored: {}", line_no, e),
                    }
                }
                Some(Some(Err(e))) => return Err(CliError::usage(format!("cannot read stdin: {}", e))),
                Some(None) => break,
                None => {}
            }
            status.report(&scheduler.status());
        }

        // End of input: fire the pending window, then wait out every save,
        // including ones queued behind a save that is still running
        scheduler.flush().await;
        let final_status = scheduler.settle().await;
        status.report(&final_status);

        match final_status {
            SaveStatus::Failed { message } => Err(CliError::save(format!("saving {}: {}", key, message))),
            _ => Ok(()),
        }
    })
}
