//! Fire-and-forget decision metrics.
//!
//! One event per guarded target, carrying the same reason tag as the audit log.
//! Emission failures are logged and dropped; they never change an outcome.

use crate::audit::Outcome;
use crate::git::OperationKind;
use crate::policy::EnforcementAction;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    OperationAllowed,
    OperationWarned,
    OperationBlocked,
    OperationCancelled,
    OperationApproved,
    OperationBypassed,
    OperationFailed,
}

impl MetricCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricCategory::OperationAllowed => "operation_allowed",
            MetricCategory::OperationWarned => "operation_warned",
            MetricCategory::OperationBlocked => "operation_blocked",
            MetricCategory::OperationCancelled => "operation_cancelled",
            MetricCategory::OperationApproved => "operation_approved",
            MetricCategory::OperationBypassed => "operation_bypassed",
            MetricCategory::OperationFailed => "operation_failed",
        }
    }

    /// Category for a final outcome. `local_action` separates warned from allowed runs.
    pub fn for_outcome(outcome: Outcome, local_action: EnforcementAction) -> Self {
        match outcome {
            Outcome::Executed if local_action == EnforcementAction::Warn => {
                MetricCategory::OperationWarned
            }
            Outcome::Executed | Outcome::ApiAllows => MetricCategory::OperationAllowed,
            Outcome::Approved => MetricCategory::OperationApproved,
            Outcome::Bypassed => MetricCategory::OperationBypassed,
            Outcome::Blocked | Outcome::BlockedApiError => MetricCategory::OperationBlocked,
            Outcome::Cancelled => MetricCategory::OperationCancelled,
            Outcome::Failed => MetricCategory::OperationFailed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricEvent {
    pub timestamp: DateTime<Utc>,
    pub category: MetricCategory,
    pub operation: OperationKind,
    pub reason: String,
    pub risk_score: f64,
    pub repo: String,
}

pub trait MetricsSink: Send + Sync {
    fn emit(&self, event: &MetricEvent) -> Result<()>;
}

/// Emit through `tracing` (target `saferun::metrics`).
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn emit(&self, event: &MetricEvent) -> Result<()> {
        tracing::info!(
            target: "saferun::metrics",
            category = event.category.as_str(),
            operation = event.operation.as_str(),
            reason = %event.reason,
            risk = event.risk_score,
            repo = %event.repo,
            "metric"
        );
        Ok(())
    }
}

/// Append events to a JSONL file (`~/.saferun/metrics.jsonl`).
pub struct JsonlMetrics {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlMetrics {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn default_path(saferun_home: &Path) -> PathBuf {
        saferun_home.join("metrics.jsonl")
    }
}

impl MetricsSink for JsonlMetrics {
    fn emit(&self, event: &MetricEvent) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open metrics file: {}", self.path.display()))?;
        writeln!(file, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }
}

/// Sends every event to each inner sink; one failing sink doesn't stop the rest.
pub struct FanoutMetrics(pub Vec<Box<dyn MetricsSink>>);

impl MetricsSink for FanoutMetrics {
    fn emit(&self, event: &MetricEvent) -> Result<()> {
        for sink in &self.0 {
            if let Err(e) = sink.emit(event) {
                tracing::debug!("metrics sink failed: {:#}", e);
            }
        }
        Ok(())
    }
}

/// Emit and swallow any error.
pub fn emit_quietly(sink: &dyn MetricsSink, event: &MetricEvent) {
    if let Err(e) = sink.emit(event) {
        tracing::debug!("metrics emission failed: {:#}", e);
    }
}
