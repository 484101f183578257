use crate::error::BenchError;
use anyhow::{Context, Result};
use log::warn;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Parse JSONL from a reader. Blank lines are ignored; lines that fail to
/// parse are returned as errors alongside the good rows.
pub fn parse_jsonl<T, R>(reader: R, source_name: &str) -> (Vec<T>, Vec<BenchError>)
where
    T: DeserializeOwned,
    R: BufRead,
{
    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                errors.push(BenchError::MalformedRecord {
                    source_name: source_name.to_string(),
                    line: line_no,
                    message: e.to_string(),
                });
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str(trimmed) {
            Ok(row) => rows.push(row),
            Err(e) => errors.push(BenchError::MalformedRecord {
                source_name: source_name.to_string(),
                line: line_no,
                message: e.to_string(),
            }),
        }
    }

    (rows, errors)
}

/// Read a JSONL file, logging and skipping malformed lines.
///
/// Failing to open the file is the only fatal error.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let (rows, errors) = parse_jsonl(BufReader::new(file), &path.display().to_string());
    for error in &errors {
        warn!("{error}");
    }
    Ok(rows)
}

/// Write one JSON object per line
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_parent_dir(path)?;
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut writer, row).context("Failed to serialize JSONL row")?;
        writer.write_all(b"\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Read a whole JSON document
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse JSON: {}", path.display()))
}

/// Write a pretty-printed JSON document with a trailing newline
pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut content =
        serde_json::to_string_pretty(value).context("Failed to serialize results to JSON")?;
    content.push('\n');
    ensure_parent_dir(path)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write results to: {}", path.display()))
}

/// Ensure the directory for an output file exists
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    Ok(())
}
