//! loadbatch CLI
//!
//! Batches newline-delimited JSON records into compressed segments and
//! delivers them to a directory tree.
//!
//! # Commands
//!
//! - `run` - Batch records from a file or stdin and deliver the segments
//! - `inspect` - Decode a segment file
//! - `version` - Show version information

mod commands;
mod sink;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Windowed batching of JSON records into bulk-load segments.
#[derive(Parser)]
#[command(name = "loadbatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Batch records and deliver one segment per destination and window
    Run {
        /// Input file of {"dataset","table","data"} lines (stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory segments are delivered to
        #[arg(short, long)]
        out: PathBuf,

        /// Spool directory for open segments (defaults to OUT/.spool)
        #[arg(long)]
        spool: Option<PathBuf>,

        /// Window length in milliseconds
        #[arg(long, default_value = "1000")]
        window_ms: u64,

        /// Maximum concurrent deliveries
        #[arg(long, default_value = "4")]
        max_jobs: usize,

        /// Ingestion worker threads
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Input queue and outcome buffer capacity
        #[arg(long, default_value = "1024")]
        buffer_size: usize,

        /// JSON file with a table schema ({"fields": [...]})
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Let the destination infer the schema
        #[arg(long)]
        auto_detect_schema: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decode a segment file
    Inspect {
        /// Segment file
        file: PathBuf,

        /// Print every record
        #[arg(short, long)]
        records: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            input,
            out,
            spool,
            window_ms,
            max_jobs,
            workers,
            buffer_size,
            schema,
            auto_detect_schema,
            format,
        } => {
            let spool = spool.unwrap_or_else(|| out.join(".spool"));
            let options = commands::run::RunOptions {
                input,
                out,
                spool,
                window_ms,
                max_jobs,
                workers,
                buffer_size,
                schema,
                auto_detect_schema,
            };
            commands::run::run(&options, &format)?;
        }
        Commands::Inspect {
            file,
            records,
            format,
        } => {
            commands::inspect::run(&file, records, &format)?;
        }
        Commands::Version => {
            println!("loadbatch CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
