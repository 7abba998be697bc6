//! Diagnostic channel for failures that happen while reporting.
//!
//! This is deliberately separate from any [`Report`](crate::Report): when a
//! task dies, the raw failure goes here first, before the report is unwound
//! and persisted. The file implementation appends one JSON object per line:
//!
//! ```text
//! reports/errors-during-reporting.jsonl
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// File name of the diagnostics log under a reports directory.
pub const DIAGNOSTICS_FILE: &str = "errors-during-reporting.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

/// Sink for raw failure records.
///
/// Implementations must not filter by verbosity: every record is kept.
pub trait DiagnosticChannel: Send + Sync {
    fn log_diagnostic(&self, message: &str, severity: DiagnosticSeverity);
}

/// One line of the diagnostics log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub ts: DateTime<Utc>,
    pub severity: DiagnosticSeverity,
    pub message: String,
}

impl DiagnosticRecord {
    pub fn new(message: impl Into<String>, severity: DiagnosticSeverity) -> Self {
        Self {
            ts: Utc::now(),
            severity,
            message: message.into(),
        }
    }
}

/// Append-only JSONL diagnostics file.
pub struct DiagnosticLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl DiagnosticLog {
    /// Open (or create) the diagnostics log inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(DIAGNOSTICS_FILE);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush.
    pub fn write(&self, record: &DiagnosticRecord) -> std::io::Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()
    }
}

impl DiagnosticChannel for DiagnosticLog {
    fn log_diagnostic(&self, message: &str, severity: DiagnosticSeverity) {
        if let Err(e) = self.write(&DiagnosticRecord::new(message, severity)) {
            // last resort; the channel itself is broken
            error!(path = ?self.path, error = %e, diagnostic = message, "Failed to write diagnostic record");
        }
    }
}

impl Drop for DiagnosticLog {
    fn drop(&mut self) {
        let _ = self.writer.lock().flush();
    }
}

/// Read every record back from a diagnostics log. Unparseable lines are
/// skipped with a warning.
pub fn read_records(path: impl AsRef<Path>) -> std::io::Result<Vec<DiagnosticRecord>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = ?path, error = %e, "Skipping unparseable diagnostic line"),
        }
    }
    Ok(records)
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    records: Mutex<Vec<DiagnosticRecord>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records.lock().clone()
    }
}

impl DiagnosticChannel for MemoryDiagnostics {
    fn log_diagnostic(&self, message: &str, severity: DiagnosticSeverity) {
        self.records.lock().push(DiagnosticRecord::new(message, severity));
    }
}
