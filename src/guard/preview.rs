//! Local human preview and dry-run payloads.

use crate::authority::DryRunRequest;
use crate::git::{OperationDescriptor, OperationKind, RepositoryContext};
use crate::policy::EnforcementDecision;
use serde_json::json;

/// One short paragraph describing what the command will do to `target`.
pub fn human_preview(
    descriptor: &OperationDescriptor,
    target: &str,
    ctx: &RepositoryContext,
    decision: &EnforcementDecision,
) -> String {
    let what = match descriptor.kind {
        OperationKind::BranchDelete => {
            let unmerged = ctx.ahead_count(target);
            let mut s = format!("Delete branch '{}'", target);
            if descriptor.forced {
                s.push_str(" (forced)");
            }
            if unmerged > 0 {
                s.push_str(&format!(
                    ", losing {} unmerged {}",
                    unmerged,
                    plural(unmerged, "commit")
                ));
            }
            s
        }
        OperationKind::ResetHard => {
            let reset_to = descriptor.reset_target();
            let discarded = ctx.behind_count(reset_to);
            let mut s = format!("Hard reset '{}' to {}", target, reset_to);
            if discarded > 0 {
                s.push_str(&format!(
                    ", discarding {} {} and all uncommitted changes",
                    discarded,
                    plural(discarded, "commit")
                ));
            } else {
                s.push_str(", discarding all uncommitted changes");
            }
            s
        }
        OperationKind::Push => {
            let remote = descriptor.remote.as_deref().unwrap_or("origin");
            if descriptor.has_flag("delete") || descriptor.has_flag("delete-refspec") {
                format!("Delete remote branch '{}' on {}", target, remote)
            } else if descriptor.has_flag("force-with-lease") && !descriptor.has_flag("force") {
                format!("Force push '{}' to {} with lease", target, remote)
            } else {
                format!("Force push '{}' to {}, overwriting remote history", target, remote)
            }
        }
        OperationKind::Clean => {
            let mut s = format!("Permanently remove untracked files and directories on '{}'", target);
            if descriptor.has_flag("ignored") || descriptor.has_flag("only-ignored") {
                s.push_str(", including ignored files");
            }
            s
        }
        OperationKind::Rebase => {
            if descriptor.has_flag("interactive") {
                format!("Rewrite the history of '{}' with an interactive rebase", target)
            } else {
                format!("Rewrite the history of '{}' with a rebase", target)
            }
        }
        OperationKind::CommitNoVerify => {
            format!("Commit to '{}' without running pre-commit or commit-msg hooks", target)
        }
        OperationKind::Unknown => format!("Run {}", descriptor.command_line()),
    };

    let mut preview = format!("{} in {}.", what, ctx.repo_slug);
    if ctx.is_protected(target) {
        preview.push_str(&format!(" '{}' is a protected branch.", target));
    }
    preview.push_str(&format!(" Local risk {:.1}/10", decision.risk_score));
    if !decision.reasons.is_empty() {
        preview.push_str(&format!(" ({})", decision.reasons.join(", ")));
    }
    preview.push('.');
    preview
}

fn plural(n: u32, word: &str) -> String {
    if n == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}

/// Dry-run payload for one target.
pub fn dry_run_request(
    descriptor: &OperationDescriptor,
    target: &str,
    ctx: &RepositoryContext,
    decision: &EnforcementDecision,
    invocation_id: &str,
) -> DryRunRequest {
    let distance = match descriptor.kind {
        OperationKind::ResetHard => ctx.distance(descriptor.reset_target()),
        _ => ctx.distance(target),
    };
    let metadata = json!({
        "repo": ctx.repo_slug,
        "current_branch": ctx.current_branch,
        "default_branch": ctx.default_branch,
        "protected": ctx.is_protected(target),
        "forced": descriptor.forced,
        "flags": descriptor.flags,
        "remote": descriptor.remote,
        "ahead": distance.ahead,
        "behind": distance.behind,
        "head_sha": ctx.resolved_shas.get("HEAD"),
        "invocation_id": invocation_id,
    });

    DryRunRequest {
        operation_type: descriptor.kind.api_operation_type().to_string(),
        target: target.to_string(),
        command: descriptor.command_line(),
        metadata,
        risk_score: decision.risk_score,
        human_preview: human_preview(descriptor, target, ctx, decision),
        requires_approval: decision.requires_approval,
        reasons: decision.reasons.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::classify;
    use crate::policy::EnforcementAction;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_reset_preview_mentions_discarded_commits() {
        let d = classify("reset", &args("--hard HEAD~5"));
        let ctx = RepositoryContext::new("acme/widgets", "main", Some("main".into()), vec!["main".into()])
            .unwrap()
            .with_distance("HEAD~5", 0, 5);
        let decision = EnforcementDecision::from_action(
            EnforcementAction::RequireApproval,
            9.5,
            vec!["protected_branch:main".into(), "commits_over_limit:3".into()],
        );
        let preview = human_preview(&d, "main", &ctx, &decision);
        assert!(preview.contains("discarding 5 commits"));
        assert!(preview.contains("protected branch"));
        assert!(preview.contains("9.5/10"));
    }

    #[test]
    fn test_dry_run_request_fields() {
        let d = classify("push", &args("--force origin main"));
        let ctx = RepositoryContext::new("acme/widgets", "main", Some("main".into()), vec!["main".into()])
            .unwrap();
        let decision =
            EnforcementDecision::from_action(EnforcementAction::RequireApproval, 8.0, vec!["force_push".into()]);
        let req = dry_run_request(&d, "main", &ctx, &decision, "inv-1");
        assert_eq!(req.operation_type, d.kind.api_operation_type());
        assert_eq!(req.command, "git push --force origin main");
        assert!(req.requires_approval);
        assert_eq!(req.metadata["protected"], true);
        assert_eq!(req.metadata["invocation_id"], "inv-1");
        assert!(req.human_preview.starts_with("Force push 'main' to origin"));
    }
}
