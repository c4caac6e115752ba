//! Built-in baselines and policy templates that ship with saferun.
//!
//! Templates are starting points for `saferun init`:
//! - `enforce`: approvals for pushes and branch deletes, warnings for the rest
//! - `strict`: everything needs approval, no bypass codes
//! - `monitor`: nothing is stopped, everything is logged

use crate::git::OperationKind;
use crate::policy::types::EnforcementAction;

/// Baseline action for an operation type when the policy has no rule for it.
pub fn default_action(kind: OperationKind) -> EnforcementAction {
    match kind {
        OperationKind::Push => EnforcementAction::RequireApproval,
        OperationKind::BranchDelete => EnforcementAction::RequireApproval,
        OperationKind::ResetHard => EnforcementAction::Warn,
        OperationKind::Clean => EnforcementAction::Warn,
        OperationKind::Rebase => EnforcementAction::Warn,
        OperationKind::CommitNoVerify => EnforcementAction::Block,
        OperationKind::Unknown => EnforcementAction::Allow,
    }
}

/// File name saferun looks for, walking up from the working directory.
pub const POLICY_FILE_NAME: &str = ".saferun.yaml";

pub const ENFORCE_YAML: &str = r#"# saferun policy: enforce
# Asks before history-rewriting pushes and branch deletes,
# warns on local destructive commands, blocks --no-verify commits.

mode: enforce

protected_branches:
  - main
  - master
  - "release/*"

bypass:
  enabled: true

rules:
  force_push:
    action: require_approval

  branch_delete:
    # No explicit action: approval by default, fully merged branches go through
    max_unmerged_commits: 0
    exclude_patterns: ["tmp/*", "scratch/*"]

  reset_hard:
    action: warn
    # Discarding more than this many commits needs approval
    max_commits_back: 3

  clean:
    action: warn

  rebase:
    action: warn

  commit_no_verify:
    action: block
"#;

pub const STRICT_YAML: &str = r#"# saferun policy: strict
# Every guarded operation needs approval. No bypass codes.
# Meant for repositories where autonomous agents run unattended.

mode: strict

protected_branches:
  - main
  - master
  - "release/*"
  - "hotfix/*"

bypass:
  enabled: false

rules:
  force_push:
    action: block

  branch_delete:
    action: require_approval

  reset_hard:
    action: require_approval
    max_commits_back: 1

  clean:
    action: require_approval

  rebase:
    action: require_approval

  commit_no_verify:
    action: block
"#;

pub const MONITOR_YAML: &str = r#"# saferun policy: monitor
# Nothing is stopped. Every guarded operation is still logged,
# so you can see what would have been caught before enforcing.

mode: monitor

protected_branches:
  - main
  - master
"#;

/// Get the YAML content for a named policy template.
pub fn get_default_policy(name: &str) -> Option<&'static str> {
    match name.to_lowercase().as_str() {
        "enforce" | "default" | "standard" => Some(ENFORCE_YAML),
        "strict" | "agent" | "paranoid" => Some(STRICT_YAML),
        "monitor" | "audit" | "off" => Some(MONITOR_YAML),
        _ => None,
    }
}

/// List all available policy template names.
pub fn available_templates() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "enforce",
            "Approval for force pushes and branch deletes, warnings for local resets",
        ),
        (
            "strict",
            "Approval for everything, no bypass codes — for unattended agents",
        ),
        ("monitor", "Log everything, stop nothing"),
    ]
}
