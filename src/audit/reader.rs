//! Audit log reader: filter and display the log.
//!
//! Reads the JSONL log and provides filtering, summarization,
//! and pretty-printing for the `saferun log` command.

use crate::audit::types::*;
use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

/// Reads and queries the audit log file.
pub struct AuditReader {
    log_path: PathBuf,
}

impl AuditReader {
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            log_path: path.as_ref().to_path_buf(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Read every entry. A missing log reads as empty.
    /// Lines that fail to parse are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<LogEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.log_path)
            .with_context(|| format!("Failed to read log file: {}", self.log_path.display()))?;

        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(i, line)| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("skipping audit line {}: {}", i + 1, e);
                    None
                }
            })
            .collect())
    }

    /// Filter entries; `limit` keeps the most recent matches.
    pub fn filter_entries(entries: &[LogEntry], filter: &LogFilter) -> Vec<LogEntry> {
        let matching: Vec<&LogEntry> = entries
            .iter()
            .filter(|e| filter.operation.map_or(true, |op| e.operation == op))
            .filter(|e| filter.outcome.map_or(true, |o| e.outcome == o))
            .filter(|e| filter.repo.as_ref().map_or(true, |r| &e.repo == r))
            .collect();

        let skip = filter
            .limit
            .map(|limit| matching.len().saturating_sub(limit))
            .unwrap_or(0);
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn summarize(entries: &[LogEntry]) -> LogSummary {
        let mut summary = LogSummary {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            match entry.outcome {
                Outcome::Executed | Outcome::ApiAllows => summary.executed += 1,
                Outcome::Approved => summary.approved += 1,
                Outcome::Bypassed => summary.bypassed += 1,
                Outcome::Blocked | Outcome::BlockedApiError => summary.blocked += 1,
                Outcome::Cancelled => summary.cancelled += 1,
                Outcome::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// Pretty-print a log entry for terminal display.
    pub fn format_entry(entry: &LogEntry) -> String {
        let timestamp = entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        let outcome = match entry.outcome {
            Outcome::Executed | Outcome::ApiAllows => entry.outcome.as_str().green().to_string(),
            Outcome::Approved => entry.outcome.as_str().yellow().to_string(),
            Outcome::Bypassed => entry.outcome.as_str().magenta().bold().to_string(),
            Outcome::Blocked | Outcome::BlockedApiError | Outcome::Failed => {
                entry.outcome.as_str().red().to_string()
            }
            Outcome::Cancelled => entry.outcome.as_str().dimmed().to_string(),
        };

        let mut line = format!(
            "[{}] {} {} -> {} ({})",
            timestamp.dimmed(),
            outcome,
            entry.operation.as_str().bold(),
            entry.target,
            entry.reason.dimmed()
        );
        if let Some(risk) = entry.risk_score {
            line.push_str(&format!(" risk {:.1}", risk));
        }
        if let Some(code) = entry.exit_code {
            if code != 0 {
                line.push_str(&format!(" exit {}", code));
            }
        }
        line
    }
}
