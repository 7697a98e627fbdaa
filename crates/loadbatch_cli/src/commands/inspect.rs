//! Inspect command implementation.

use loadbatch_core::decode_records;
use serde::Serialize;
use std::path::Path;

/// Segment inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Segment file path.
    pub path: String,
    /// Compressed size in bytes.
    pub compressed_size: u64,
    /// Decompressed size in bytes, newlines included.
    pub raw_size: u64,
    /// Number of records.
    pub record_count: usize,
    /// Records that are not valid JSON.
    pub invalid_records: usize,
    /// Decoded records (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<serde_json::Value>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_records: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_records)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Decodes the segment at `path`.
pub fn inspect(path: &Path, keep_records: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No segment found at {:?}", path).into());
    }

    let compressed = std::fs::read(path)?;
    let lines = decode_records(&compressed)?;

    let mut invalid_records = 0;
    let mut records = Vec::new();
    for line in &lines {
        match serde_json::from_slice::<serde_json::Value>(line) {
            Ok(value) if keep_records => records.push(value),
            Ok(_) => {}
            Err(_) => invalid_records += 1,
        }
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        compressed_size: compressed.len() as u64,
        raw_size: lines.iter().map(|l| l.len() as u64 + 1).sum(),
        record_count: lines.len(),
        invalid_records,
        records: keep_records.then_some(records),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("loadbatch segment");
    println!("=================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Size:");
    println!("  Compressed: {}", format_size(result.compressed_size));
    println!("  Raw:        {}", format_size(result.raw_size));
    if result.raw_size > 0 {
        println!(
            "  Ratio:      {:.2}",
            result.compressed_size as f64 / result.raw_size as f64
        );
    }
    println!();
    println!("Records: {}", result.record_count);
    if result.invalid_records > 0 {
        println!("  Invalid: {}", result.invalid_records);
    }

    if let Some(records) = &result.records {
        println!();
        for record in records {
            println!("{record}");
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
