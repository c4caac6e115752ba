//! Types for the approval flow.

use crate::authority::RemoteVerdict;
use crate::git::OperationKind;
use std::fmt;

/// Everything a channel needs to ask for approval of one target.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub operation: OperationKind,
    pub target: String,
    pub command: String,
    pub change_id: String,
    pub approve_url: Option<String>,
    pub risk_score: f64,
    pub reasons: Vec<String>,
    pub human_preview: String,
}

impl ApprovalRequest {
    pub fn from_verdict(
        operation: OperationKind,
        target: impl Into<String>,
        command: impl Into<String>,
        local_preview: &str,
        verdict: &RemoteVerdict,
    ) -> Self {
        let human_preview = if verdict.human_preview.trim().is_empty() {
            local_preview.to_string()
        } else {
            verdict.human_preview.clone()
        };
        Self {
            operation,
            target: target.into(),
            command: command.into(),
            change_id: verdict.change_id.clone(),
            approve_url: verdict.approve_url.clone(),
            risk_score: verdict.risk(),
            reasons: verdict.reasons.clone(),
            human_preview,
        }
    }
}

/// Why an approval ended without permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    UserCancelled,
    Timeout,
    Rejected,
    Expired,
    Interrupted,
    BypassRejected,
    ChannelError,
}

impl CancelReason {
    /// Stable audit/metrics reason tag.
    pub fn tag(&self) -> &'static str {
        match self {
            CancelReason::UserCancelled => "user_cancelled",
            CancelReason::Timeout => "approval_timeout",
            CancelReason::Rejected => "approval_rejected",
            CancelReason::Expired => "approval_expired",
            CancelReason::Interrupted => "interrupted",
            CancelReason::BypassRejected => "bypass_rejected",
            CancelReason::ChannelError => "approval_error",
        }
    }
}

/// Terminal outcome of one approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    /// Local one-time code. Never reported as a normal approval.
    Bypassed,
    Cancelled(CancelReason),
}

impl ApprovalOutcome {
    pub fn is_permitted(&self) -> bool {
        matches!(self, ApprovalOutcome::Approved | ApprovalOutcome::Bypassed)
    }

    pub fn reason_tag(&self) -> &'static str {
        match self {
            ApprovalOutcome::Approved => "approval_granted",
            ApprovalOutcome::Bypassed => "bypass_code",
            ApprovalOutcome::Cancelled(reason) => reason.tag(),
        }
    }
}

/// The approval channels, in menu order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    DirectWait,
    Browser,
    Webhook,
    Bypass,
    Cancel,
}

impl ChannelKind {
    pub fn key(&self) -> char {
        match self {
            ChannelKind::DirectWait => 'w',
            ChannelKind::Browser => 'b',
            ChannelKind::Webhook => 'n',
            ChannelKind::Bypass => 'c',
            ChannelKind::Cancel => 'x',
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChannelKind::DirectWait => "Wait for approval",
            ChannelKind::Browser => "Open approval page",
            ChannelKind::Webhook => "Notify reviewers",
            ChannelKind::Bypass => "Enter bypass code",
            ChannelKind::Cancel => "Cancel",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelKind::DirectWait => "direct_wait",
            ChannelKind::Browser => "browser",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Bypass => "bypass",
            ChannelKind::Cancel => "cancel",
        };
        write!(f, "{}", s)
    }
}

/// Orchestrator states, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    AwaitingChannelSelection,
    Waiting(ChannelKind),
    Approved,
    Bypassed,
    Cancelled,
}

impl From<ApprovalOutcome> for ApprovalState {
    fn from(outcome: ApprovalOutcome) -> Self {
        match outcome {
            ApprovalOutcome::Approved => ApprovalState::Approved,
            ApprovalOutcome::Bypassed => ApprovalState::Bypassed,
            ApprovalOutcome::Cancelled(_) => ApprovalState::Cancelled,
        }
    }
}
