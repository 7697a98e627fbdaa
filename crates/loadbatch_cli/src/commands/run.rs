//! Run command implementation.

use crate::sink::DirectoryBackend;
use loadbatch_core::{
    LoadFailure, LoadResult, Loader, LoaderConfig, PartitionKey, Row, TableSchema,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Settings for one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Input file, or stdin when absent.
    pub input: Option<PathBuf>,
    /// Delivery root.
    pub out: PathBuf,
    /// Spool directory.
    pub spool: PathBuf,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Maximum concurrent deliveries.
    pub max_jobs: usize,
    /// Ingestion workers.
    pub workers: usize,
    /// Queue and outcome buffer capacity.
    pub buffer_size: usize,
    /// Schema file.
    pub schema: Option<PathBuf>,
    /// Let the destination infer the schema.
    pub auto_detect_schema: bool,
}

/// One input line.
#[derive(Debug, Deserialize)]
struct InputLine {
    dataset: String,
    table: String,
    data: serde_json::Value,
}

/// A rejected input line.
#[derive(Debug, Error)]
enum InputError {
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },

    #[error("line {line}: dataset and table must not be empty")]
    MissingDestination { line: usize },
}

/// Totals reported at the end of a run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    /// Lines read from the input.
    pub lines: usize,
    /// Lines skipped as invalid.
    pub skipped: usize,
    /// Segments delivered.
    pub delivered: usize,
    /// Records in delivered segments.
    pub delivered_records: u64,
    /// Compressed bytes delivered.
    pub delivered_bytes: u64,
    /// Failed segments or records.
    pub failed: usize,
    /// Failure messages.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Runs the run command.
pub fn run(options: &RunOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let summary = match &options.input {
        Some(path) => execute(options, BufReader::new(File::open(path)?))?,
        None => execute(options, io::stdin().lock())?,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print_text_output(&summary),
    }

    if summary.failed > 0 {
        return Err(format!("{} deliveries failed", summary.failed).into());
    }
    Ok(())
}

/// Batches every line of `input` and waits for all outcomes.
pub fn execute(
    options: &RunOptions,
    input: impl BufRead,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let config = loader_config(options)?;
    let backend = Arc::new(DirectoryBackend::new(&options.out));
    let loader: Loader<Row> = Loader::open(config, backend)?;

    let successes = loader.successes();
    let failures = loader.failures();
    let delivered = thread::spawn(move || successes.iter().collect::<Vec<LoadResult>>());
    let failed = thread::spawn(move || failures.iter().collect::<Vec<LoadFailure>>());

    let mut summary = RunSummary::default();
    let mut read_error = None;
    for (index, line) in input.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                read_error = Some(e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;

        match parse_line(index + 1, &line) {
            Ok(row) => loader.submit(row)?,
            Err(e) => {
                warn!(error = %e, "skipping input line");
                summary.skipped += 1;
            }
        }
    }

    loader.close();

    let delivered = delivered.join().map_err(|_| "success collector panicked")?;
    let failed = failed.join().map_err(|_| "failure collector panicked")?;

    summary.delivered = delivered.len();
    summary.delivered_records = delivered.iter().map(|r| r.records).sum();
    summary.delivered_bytes = delivered.iter().map(|r| r.size).sum();
    summary.failed = failed.len();
    summary.errors = failed
        .iter()
        .map(|f| match &f.segment {
            Some(segment) => format!("{segment}: {}", f.cause),
            None => f.cause.to_string(),
        })
        .collect();

    match read_error {
        Some(e) => Err(e.into()),
        None => Ok(summary),
    }
}

fn loader_config(options: &RunOptions) -> Result<LoaderConfig, Box<dyn std::error::Error>> {
    let mut config = LoaderConfig::new()
        .with_dir(&options.spool)
        .with_window(Duration::from_millis(options.window_ms))
        .with_max_jobs(options.max_jobs)
        .with_workers(options.workers)
        .with_buffer_size(options.buffer_size)
        .with_auto_detect_schema(options.auto_detect_schema);

    if let Some(path) = &options.schema {
        config = config.with_schema(read_schema(path)?);
    }
    Ok(config)
}

fn read_schema(path: &Path) -> Result<TableSchema, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let schema = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| format!("invalid schema {}: {e}", path.display()))?;
    Ok(schema)
}

fn parse_line(line: usize, text: &str) -> Result<Row, InputError> {
    let input: InputLine =
        serde_json::from_str(text).map_err(|source| InputError::Parse { line, source })?;
    if input.dataset.is_empty() || input.table.is_empty() {
        return Err(InputError::MissingDestination { line });
    }
    Ok(Row::new(
        PartitionKey::new(input.dataset, input.table),
        input.data,
    ))
}

fn print_text_output(summary: &RunSummary) {
    println!("loadbatch run");
    println!("=============");
    println!();
    println!("Input:");
    println!("  Lines:   {}", summary.lines);
    println!("  Skipped: {}", summary.skipped);
    println!();
    println!("Delivered:");
    println!("  Segments: {}", summary.delivered);
    println!("  Records:  {}", summary.delivered_records);
    println!("  Bytes:    {}", summary.delivered_bytes);

    if summary.failed > 0 {
        println!();
        println!("Failed: {}", summary.failed);
        for error in &summary.errors {
            println!("  {error}");
        }
    }
}
