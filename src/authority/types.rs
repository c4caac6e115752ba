//! Wire types for the remote risk authority.

use crate::policy::types::clamp_risk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Body of `POST /v1/dry-run/{operation_type}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DryRunRequest {
    pub operation_type: String,
    pub target: String,
    pub command: String,
    /// Repository facts the authority may use for its own scoring
    pub metadata: serde_json::Value,
    pub risk_score: f64,
    pub human_preview: String,
    pub requires_approval: bool,
    pub reasons: Vec<String>,
}

/// The authority's verdict for one target.
///
/// The approval flag is mandatory on the wire under either spelling
/// (`needs_approval` or `requires_approval`); a body carrying neither is
/// rejected rather than read as "no approval needed".
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(try_from = "WireVerdict")]
pub struct RemoteVerdict {
    pub change_id: String,
    pub needs_approval: bool,
    pub approve_url: Option<String>,
    pub revert_url: Option<String>,
    pub revert_window_hours: Option<u32>,
    pub risk_score: f64,
    pub reasons: Vec<String>,
    pub human_preview: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct WireVerdict {
    change_id: String,
    #[serde(default)]
    needs_approval: Option<bool>,
    #[serde(default)]
    requires_approval: Option<bool>,
    #[serde(default, alias = "approval_url")]
    approve_url: Option<String>,
    #[serde(default)]
    revert_url: Option<String>,
    #[serde(default)]
    revert_window_hours: Option<u32>,
    #[serde(default)]
    risk_score: f64,
    #[serde(default)]
    reasons: Vec<String>,
    #[serde(default)]
    human_preview: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<WireVerdict> for RemoteVerdict {
    type Error = String;

    fn try_from(wire: WireVerdict) -> Result<Self, Self::Error> {
        let needs_approval = match (wire.needs_approval, wire.requires_approval) {
            (None, None) => {
                return Err(format!(
                    "verdict for {} carries neither needs_approval nor requires_approval",
                    wire.change_id
                ))
            }
            (a, b) => a.unwrap_or(false) || b.unwrap_or(false),
        };
        Ok(Self {
            change_id: wire.change_id,
            needs_approval,
            approve_url: wire.approve_url,
            revert_url: wire.revert_url,
            revert_window_hours: wire.revert_window_hours,
            risk_score: wire.risk_score,
            reasons: wire.reasons,
            human_preview: wire.human_preview,
            expires_at: wire.expires_at,
        })
    }
}

impl RemoteVerdict {
    pub fn risk(&self) -> f64 {
        clamp_risk(self.risk_score)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Lifecycle state of a change as reported by `GET /v1/changes/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Applied,
    Cancelled,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ChangeStatus {
    /// Whether polling can stop.
    pub fn is_settled(&self) -> bool {
        !matches!(self, ChangeStatus::Pending | ChangeStatus::Unknown)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeStatusResponse {
    #[serde(default)]
    pub change_id: Option<String>,
    pub status: ChangeStatus,
}

/// Terminal status reported once per change id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Applied,
    Cancelled,
    Failed,
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfirmationStatus::Applied => "applied",
            ConfirmationStatus::Cancelled => "cancelled",
            ConfirmationStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Body of `POST /v1/changes/confirm`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Confirmation {
    pub change_id: String,
    pub status: ConfirmationStatus,
    pub metadata: serde_json::Value,
}

impl Confirmation {
    pub fn applied(change_id: impl Into<String>) -> Self {
        Self {
            change_id: change_id.into(),
            status: ConfirmationStatus::Applied,
            metadata: serde_json::json!({}),
        }
    }

    pub fn failed(change_id: impl Into<String>, exit_code: i32) -> Self {
        Self {
            change_id: change_id.into(),
            status: ConfirmationStatus::Failed,
            metadata: serde_json::json!({ "exit_code": exit_code }),
        }
    }

    pub fn cancelled(change_id: impl Into<String>, reason: &str) -> Self {
        Self {
            change_id: change_id.into(),
            status: ConfirmationStatus::Cancelled,
            metadata: serde_json::json!({ "reason": reason }),
        }
    }
}
