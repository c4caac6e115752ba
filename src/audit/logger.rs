//! Audit log writer: append-only JSONL.
//!
//! Writes to `~/.saferun/logs/audit.jsonl` (or `$SAFERUN_HOME/logs/audit.jsonl`),
//! one JSON object per line. Flushes after every write for crash safety.

use crate::audit::types::LogEntry;
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Where audit entries go.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &LogEntry) -> Result<()>;
}

/// Append-only audit logger that writes a JSONL file.
pub struct AuditLogger {
    log_path: PathBuf,
    file: Mutex<File>,
}

impl AuditLogger {
    /// Open (or create) the log file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let log_path = path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create log directory: {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

        Ok(Self {
            log_path,
            file: Mutex::new(file),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// The audit log path under a saferun home directory.
    pub fn default_path(saferun_home: &Path) -> PathBuf {
        saferun_home.join("logs").join("audit.jsonl")
    }
}

impl AuditSink for AuditLogger {
    fn record(&self, entry: &LogEntry) -> Result<()> {
        let json = serde_json::to_string(entry).context("Failed to serialize log entry")?;
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        writeln!(file, "{}", json).context("Failed to write log entry")?;
        file.flush().context("Failed to flush log file")?;
        Ok(())
    }
}
