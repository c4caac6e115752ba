//! Types for the saferun audit log.
//!
//! Every guarded target produces exactly one entry, whatever the outcome.
//! Blocks, cancellations and bypasses are as important to keep as executions.

use crate::git::OperationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a guarded target ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Allowed or warned locally, git ran
    Executed,
    /// Local policy asked for approval, the authority said it wasn't needed
    ApiAllows,
    Approved,
    Bypassed,
    Blocked,
    /// Fail-secure block: the authority was unreachable or erroring
    BlockedApiError,
    Cancelled,
    /// Permitted, but git exited nonzero
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Executed => "executed",
            Outcome::ApiAllows => "api_allows",
            Outcome::Approved => "approved",
            Outcome::Bypassed => "bypassed",
            Outcome::Blocked => "blocked",
            Outcome::BlockedApiError => "blocked_api_error",
            Outcome::Cancelled => "cancelled",
            Outcome::Failed => "failed",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Outcome> {
        match s.to_lowercase().trim() {
            "executed" | "allowed" | "allow" => Some(Outcome::Executed),
            "api_allows" => Some(Outcome::ApiAllows),
            "approved" => Some(Outcome::Approved),
            "bypassed" | "bypass" => Some(Outcome::Bypassed),
            "blocked" | "block" | "denied" => Some(Outcome::Blocked),
            "blocked_api_error" | "api_error" => Some(Outcome::BlockedApiError),
            "cancelled" | "canceled" => Some(Outcome::Cancelled),
            "failed" => Some(Outcome::Failed),
            _ => None,
        }
    }

    /// Whether git ran for this target.
    pub fn ran_git(&self) -> bool {
        matches!(
            self,
            Outcome::Executed
                | Outcome::ApiAllows
                | Outcome::Approved
                | Outcome::Bypassed
                | Outcome::Failed
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single entry in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,

    /// Always `operation_guard` for now
    pub event: String,

    /// One id per saferun invocation, shared by every target of a batch
    pub invocation_id: String,

    pub operation: OperationKind,

    /// `owner/repo` when known
    pub repo: String,

    /// Branch or ref the decision was about
    pub target: String,

    pub command: String,

    pub outcome: Outcome,

    /// Stable reason tag (`policy_block`, `api_unreachable`, `bypass_code`, ...)
    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
}

pub const GUARD_EVENT: &str = "operation_guard";

/// Summary statistics for a set of audit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSummary {
    pub total: usize,
    pub executed: usize,
    pub approved: usize,
    pub bypassed: usize,
    pub blocked: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl LogSummary {
    /// Format as a human-readable one-liner for terminal output.
    pub fn one_line(&self) -> String {
        format!(
            "{} operations | {} executed | {} approved | {} bypassed | {} blocked | {} cancelled | {} failed",
            self.total,
            self.executed,
            self.approved,
            self.bypassed,
            self.blocked,
            self.cancelled,
            self.failed
        )
    }
}

/// Filter criteria for querying audit logs.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub operation: Option<OperationKind>,
    pub outcome: Option<Outcome>,
    pub repo: Option<String>,
    /// Keep only the most recent N matching entries
    pub limit: Option<usize>,
}
