//! Execution & confirmation: run git once, then settle every cleared change.

use crate::authority::{Confirmation, ConfirmationLedger};
use crate::git::executor::APPROVED_CHANGE_ENV;
use crate::git::GitBackend;
use anyhow::{Context, Result};
use std::sync::Arc;

/// How a change id got cleared for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clearance {
    Approved,
    Bypassed,
    /// The authority said no approval was needed
    ApiAllows,
}

/// A change id cleared for execution, waiting for its applied/failed confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApproval {
    pub change_id: String,
    pub target: String,
    pub clearance: Clearance,
    pub revert_url: Option<String>,
}

/// Environment for the git child: the cleared change ids, comma-joined.
pub fn approval_env(pending: &[PendingApproval]) -> Vec<(String, String)> {
    if pending.is_empty() {
        return Vec::new();
    }
    let ids: Vec<&str> = pending.iter().map(|p| p.change_id.as_str()).collect();
    vec![(APPROVED_CHANGE_ENV.to_string(), ids.join(","))]
}

/// Run the real command on the blocking pool. Exit code of the child.
pub async fn run_git(
    git: Arc<dyn GitBackend>,
    subcommand: &str,
    args: &[String],
    env: Vec<(String, String)>,
) -> Result<i32> {
    let subcommand = subcommand.to_string();
    let args = args.to_vec();
    tokio::task::spawn_blocking(move || git.run(&subcommand, &args, &env))
        .await
        .context("git task panicked")?
}

/// Report `applied` (exit 0) or `failed` for every pending change.
/// Consumes the list so no change can be confirmed twice from here.
pub async fn confirm_execution(
    ledger: &ConfirmationLedger,
    pending: Vec<PendingApproval>,
    exit_code: i32,
) {
    for p in pending {
        let confirmation = if exit_code == 0 {
            Confirmation::applied(&p.change_id)
        } else {
            Confirmation::failed(&p.change_id, exit_code)
        };
        ledger.confirm(confirmation).await;
    }
}
