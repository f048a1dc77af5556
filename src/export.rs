//! CSV/JSON export of data already held by a view.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
  Csv,
  Json,
}

impl ExportFormat {
  pub fn extension(&self) -> &'static str {
    match self {
      ExportFormat::Csv => "csv",
      ExportFormat::Json => "json",
    }
  }
}

impl FromStr for ExportFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "csv" => Ok(ExportFormat::Csv),
      "json" => Ok(ExportFormat::Json),
      other => Err(format!("unknown export format '{}'", other)),
    }
  }
}

impl fmt::Display for ExportFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.extension())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
  /// The view is loading or has nothing to export
  #[error("{view} has no settled data to export")]
  NotReady { view: String },
  #[error("failed to encode {view}: {message}")]
  Encode { view: String, message: String },
}

/// Serialized export ready to be handed to a [`Saver`].
#[derive(Debug, Clone)]
pub struct ExportBlob {
  pub filename: String,
  pub bytes: Vec<u8>,
  /// Hex SHA-256 of `bytes`
  pub sha256: String,
}

impl ExportBlob {
  pub fn new(filename: String, bytes: Vec<u8>) -> Self {
    let sha256 = hex::encode(Sha256::digest(&bytes));
    Self {
      filename,
      bytes,
      sha256,
    }
  }
}

/// `{stem}-{yyyymmdd-hhmmss}.{ext}`
pub fn export_filename(stem: &str, format: ExportFormat, at: DateTime<Utc>) -> String {
  format!(
    "{}-{}.{}",
    stem,
    at.format("%Y%m%d-%H%M%S"),
    format.extension()
  )
}

/// Encode `records` (JSON objects, one per row) in `format`.
pub fn encode(records: &[Value], format: ExportFormat) -> Result<Vec<u8>, serde_json::Error> {
  match format {
    ExportFormat::Json => serde_json::to_vec_pretty(records),
    ExportFormat::Csv => Ok(to_csv(records).into_bytes()),
  }
}

/// Render records as RFC 4180 CSV. Columns are the union of object keys in
/// first-seen order; non-object records land in a `value` column.
fn to_csv(records: &[Value]) -> String {
  let mut columns: Vec<String> = Vec::new();
  for record in records {
    match record {
      Value::Object(map) => {
        for key in map.keys() {
          if !columns.iter().any(|c| c == key) {
            columns.push(key.clone());
          }
        }
      }
      _ => {
        if !columns.iter().any(|c| c == "value") {
          columns.push("value".to_string());
        }
      }
    }
  }

  let mut out = String::new();
  push_row(&mut out, columns.iter().map(String::as_str));
  for record in records {
    let cells: Vec<String> = columns
      .iter()
      .map(|column| match record {
        Value::Object(map) => map.get(column).map(cell).unwrap_or_default(),
        other if column == "value" => cell(other),
        _ => String::new(),
      })
      .collect();
    push_row(&mut out, cells.iter().map(String::as_str));
  }
  out
}

fn cell(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
  for (i, cell) in cells.enumerate() {
    if i > 0 {
      out.push(',');
    }
    if cell.contains([',', '"', '\n', '\r']) {
      out.push('"');
      out.push_str(&cell.replace('"', "\"\""));
      out.push('"');
    } else {
      out.push_str(cell);
    }
  }
  out.push_str("\r\n");
}

/// Boundary to the "save/download" collaborator.
pub trait Saver {
  /// Persist `blob`, returning where it went.
  fn save(&self, blob: &ExportBlob) -> Result<PathBuf>;
}

/// Saves exports as files in a directory.
#[derive(Debug, Clone)]
pub struct DirectorySaver {
  dir: PathBuf,
}

impl DirectorySaver {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }
}

impl Saver for DirectorySaver {
  fn save(&self, blob: &ExportBlob) -> Result<PathBuf> {
    std::fs::create_dir_all(&self.dir)
      .map_err(|e| eyre!("Failed to create export directory {}: {}", self.dir.display(), e))?;

    let path = self.dir.join(&blob.filename);
    std::fs::write(&path, &blob.bytes)
      .map_err(|e| eyre!("Failed to write export {}: {}", path.display(), e))?;

    info!(path = %path.display(), bytes = blob.bytes.len(), sha256 = %blob.sha256, "export saved");
    Ok(path)
  }
}
