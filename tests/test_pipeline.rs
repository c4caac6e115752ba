//! End-to-end runs of the guard pipeline against in-memory collaborators.
//!
//! Every test checks the same three things the guard promises: git runs at
//! most once, each target gets exactly one audit entry and metric, and each
//! change id the authority issued is confirmed exactly once.

mod common;

use common::*;
use saferun::approval::types::ChannelKind;
use saferun::audit::Outcome;
use saferun::authority::{ChangeStatus, ConfirmationStatus};
use saferun::git::executor::APPROVED_CHANGE_ENV;
use saferun::metrics::MetricCategory;

const POLICY: &str = include_str!("fixtures/test_policy.yaml");

fn assert_one_record_per_target(h: &Harness, targets: usize) {
    assert_eq!(h.audit.entries().len(), targets, "one audit entry per target");
    assert_eq!(h.metrics.events().len(), targets, "one metric per target");
}

fn assert_confirmed_once(h: &Harness) {
    for (id, count) in h.confirmation_counts() {
        assert_eq!(count, 1, "change {} confirmed {} times", id, count);
    }
}

#[tokio::test]
async fn test_fully_merged_branch_delete_just_runs() {
    let git = FakeGit::on_branch("work").with_ref("old-feature", "f1");
    let h = Harness::new(git, FakeAuthority::new(), ScriptedPrompter::choosing(ChannelKind::Cancel));
    let guard = h.guard("");

    let code = guard.run("branch", &args("-D old-feature")).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(h.git.runs().len(), 1);
    assert_eq!(h.authority.dry_run_count(), 0);
    assert_eq!(h.prompter.prompts(), 0);

    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::Executed);
    assert_eq!(entries[0].reason, "policy_allow");
    assert_eq!(entries[0].target, "old-feature");
    assert_eq!(entries[0].repo, "acme/widgets");
    assert_eq!(entries[0].exit_code, Some(0));
    assert_one_record_per_target(&h, 1);
}

#[tokio::test]
async fn test_force_push_fails_secure_when_authority_unreachable() {
    let h = Harness::new(
        FakeGit::on_branch("main"),
        FakeAuthority::new().script("main", DryRunScript::Unreachable),
        ScriptedPrompter::choosing(ChannelKind::DirectWait),
    );
    let guard = h.guard(POLICY);

    let code = guard.run("push", &args("--force origin main")).await.unwrap();

    assert_eq!(code, 1);
    assert!(h.git.runs().is_empty(), "push must never execute");
    assert_eq!(h.prompter.prompts(), 0);

    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::BlockedApiError);
    assert_eq!(entries[0].reason, "api_unreachable");
    assert_eq!(h.metrics.events()[0].category, MetricCategory::OperationBlocked);
    assert_one_record_per_target(&h, 1);
}

#[tokio::test]
async fn test_api_error_status_is_tagged_separately() {
    let h = Harness::new(
        FakeGit::on_branch("main"),
        FakeAuthority::new().script("main", DryRunScript::Status(403)),
        ScriptedPrompter::choosing(ChannelKind::DirectWait),
    );
    let code = h.guard(POLICY).run("push", &args("-f origin main")).await.unwrap();

    assert_eq!(code, 1);
    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::BlockedApiError);
    assert_eq!(entries[0].reason, "api_error");
}

#[tokio::test]
async fn test_verdict_without_approval_flag_blocks() {
    let h = Harness::new(
        FakeGit::on_branch("main"),
        FakeAuthority::new().script(
            "main",
            DryRunScript::Body(r#"{"change_id":"chg-bare","risk_score":9.1,"reasons":["force"]}"#),
        ),
        ScriptedPrompter::choosing(ChannelKind::DirectWait),
    );
    let code = h.guard(POLICY).run("push", &args("--force origin main")).await.unwrap();

    assert_eq!(code, 1);
    assert!(h.git.runs().is_empty(), "push must never execute");
    assert_eq!(h.prompter.prompts(), 0);
    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::BlockedApiError);
    assert_eq!(entries[0].reason, "api_error");
    assert_one_record_per_target(&h, 1);
}

#[tokio::test]
async fn test_verdict_with_both_approval_spellings_still_asks() {
    let h = Harness::new(
        FakeGit::on_branch("main"),
        FakeAuthority::new().script(
            "main",
            DryRunScript::Body(
                r#"{"change_id":"chg-both","needs_approval":false,"requires_approval":true}"#,
            ),
        ),
        ScriptedPrompter::choosing(ChannelKind::Cancel),
    );
    let code = h.guard(POLICY).run("push", &args("--force origin main")).await.unwrap();

    assert_eq!(code, 1);
    assert!(h.git.runs().is_empty());
    assert_eq!(h.prompter.prompts(), 1);
    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::Cancelled);
    assert_eq!(entries[0].change_id.as_deref(), Some("chg-both"));
    assert_confirmed_once(&h);
}

#[tokio::test]
async fn test_reset_over_limit_waits_for_approval() {
    let git = FakeGit::on_branch("main")
        .with_ref("HEAD~5", "h5")
        .with_count("h5", "h0", 5);
    let h = Harness::new(
        git,
        FakeAuthority::new()
            .script("main", DryRunScript::Verdict(verdict("chg-reset", true)))
            .statuses(&[ChangeStatus::Pending, ChangeStatus::Pending, ChangeStatus::Approved]),
        ScriptedPrompter::choosing(ChannelKind::DirectWait),
    );
    let guard = h.guard(POLICY);

    let code = guard.run("reset", &args("--hard HEAD~5")).await.unwrap();

    assert_eq!(code, 0);
    let dry_runs = h.authority.dry_runs.lock().unwrap().clone();
    assert_eq!(dry_runs.len(), 1);
    assert!(dry_runs[0].reasons.contains(&"commits_over_limit:3".to_string()));
    assert!(dry_runs[0].risk_score >= 8.0);
    assert!(dry_runs[0].human_preview.contains("discarding 5 commits"));

    let runs = h.git.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(
        runs[0].env,
        vec![(APPROVED_CHANGE_ENV.to_string(), "chg-reset".to_string())]
    );

    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::Approved);
    assert_eq!(entries[0].reason, "approval_granted");
    assert_eq!(entries[0].change_id.as_deref(), Some("chg-reset"));

    let confirmations = h.authority.confirmations();
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].status, ConfirmationStatus::Applied);
    assert_one_record_per_target(&h, 1);
}

#[tokio::test]
async fn test_clean_on_protected_branch_with_bypass_code() {
    let h = Harness::new(
        FakeGit::on_branch("main"),
        FakeAuthority::new().script("main", DryRunScript::Verdict(verdict("chg-clean", true))),
        ScriptedPrompter::choosing(ChannelKind::Bypass).with_codes(&[Some("482913")]),
    )
    .with_bypass_codes(&["482913"]);
    let guard = h.guard(POLICY);

    let code = guard.run("clean", &args("-fd")).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(h.git.runs().len(), 1);
    assert!(h.prompter.offered.lock().unwrap()[0].contains(&ChannelKind::Bypass));

    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::Bypassed);
    assert_eq!(entries[0].reason, "bypass_code");

    let event = &h.metrics.events()[0];
    assert_eq!(event.category, MetricCategory::OperationBypassed);
    assert_ne!(event.reason, "executed");
    assert_ne!(event.reason, "approval_granted");

    let confirmations = h.authority.confirmations();
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].status, ConfirmationStatus::Applied);
}

#[tokio::test]
async fn test_bypass_not_offered_in_strict_mode() {
    let h = Harness::new(
        FakeGit::on_branch("main"),
        FakeAuthority::new().script("main", DryRunScript::Verdict(verdict("chg-1", true))),
        ScriptedPrompter::choosing(ChannelKind::Cancel),
    )
    .with_bypass_codes(&["482913"]);
    let guard = h.guard("mode: strict\nbypass: true\n");

    let code = guard.run("clean", &args("-fd")).await.unwrap();

    assert_eq!(code, 1);
    assert!(!h.prompter.offered.lock().unwrap()[0].contains(&ChannelKind::Bypass));
    assert!(h.git.runs().is_empty());
    assert_eq!(h.audit.entries()[0].outcome, Outcome::Cancelled);
    assert_confirmed_once(&h);
}

#[tokio::test]
async fn test_no_verify_commit_is_blocked_locally() {
    let h = Harness::new(
        FakeGit::on_branch("feature"),
        FakeAuthority::new(),
        ScriptedPrompter::choosing(ChannelKind::DirectWait),
    );
    let code = h
        .guard(POLICY)
        .run("commit", &args("--no-verify -m wip"))
        .await
        .unwrap();

    assert_eq!(code, 1);
    assert!(h.git.runs().is_empty());
    assert_eq!(h.authority.dry_run_count(), 0, "local block never asks the authority");
    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::Blocked);
    assert_eq!(entries[0].reason, "policy_block");
}

#[tokio::test]
async fn test_authority_can_waive_approval() {
    let h = Harness::new(
        FakeGit::on_branch("feature"),
        FakeAuthority::new().script("feature", DryRunScript::Verdict(verdict("chg-ok", false))),
        ScriptedPrompter::choosing(ChannelKind::Cancel),
    );
    let code = h
        .guard(POLICY)
        .run("push", &args("--force-with-lease origin feature"))
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(h.prompter.prompts(), 0);
    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::ApiAllows);
    assert_eq!(entries[0].reason, "api_allows");
    assert_eq!(h.authority.confirmations().len(), 1);
    assert_eq!(h.authority.confirmations()[0].status, ConfirmationStatus::Applied);
}

#[tokio::test]
async fn test_cancelled_approval_confirms_cancelled_once() {
    let h = Harness::new(
        FakeGit::on_branch("main"),
        FakeAuthority::new().script("main", DryRunScript::Verdict(verdict("chg-x", true))),
        ScriptedPrompter::choosing(ChannelKind::Cancel),
    );
    let code = h.guard(POLICY).run("push", &args("-f origin main")).await.unwrap();

    assert_eq!(code, 1);
    assert!(h.git.runs().is_empty());
    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::Cancelled);
    assert_eq!(entries[0].reason, "user_cancelled");

    let confirmations = h.authority.confirmations();
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].status, ConfirmationStatus::Cancelled);
}

#[tokio::test]
async fn test_approval_timeout_is_cancelled() {
    let h = Harness::new(
        FakeGit::on_branch("main"),
        FakeAuthority::new().script("main", DryRunScript::Verdict(verdict("chg-slow", true))),
        ScriptedPrompter::choosing(ChannelKind::DirectWait),
    );
    let code = h.guard(POLICY).run("push", &args("-f origin main")).await.unwrap();

    assert_eq!(code, 1);
    assert!(h.git.runs().is_empty());
    assert_eq!(h.audit.entries()[0].reason, "approval_timeout");
    assert_eq!(h.authority.confirmations()[0].status, ConfirmationStatus::Cancelled);
    assert_confirmed_once(&h);
}

#[tokio::test]
async fn test_expired_verdict_is_cancelled_without_prompting() {
    let mut stale = verdict("chg-stale", true);
    stale.expires_at = Some(chrono::Utc::now() - chrono::Duration::minutes(1));
    let h = Harness::new(
        FakeGit::on_branch("main"),
        FakeAuthority::new()
            .script("main", DryRunScript::Verdict(stale))
            .statuses(&[ChangeStatus::Approved]),
        ScriptedPrompter::choosing(ChannelKind::DirectWait),
    );
    let code = h.guard(POLICY).run("push", &args("-f origin main")).await.unwrap();

    assert_eq!(code, 1);
    assert!(h.git.runs().is_empty());
    assert_eq!(h.prompter.prompts(), 0);

    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::Cancelled);
    assert_eq!(entries[0].reason, "approval_expired");

    let confirmations = h.authority.confirmations();
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].status, ConfirmationStatus::Cancelled);
    assert_eq!(confirmations[0].metadata["reason"], "approval_expired");
    assert_one_record_per_target(&h, 1);
}

#[tokio::test]
async fn test_cancel_aborts_the_whole_batch() {
    let git = FakeGit::on_branch("work")
        .with_ref("a", "a1")
        .with_ref("b", "b1")
        .with_count("m0", "a1", 2)
        .with_count("m0", "b1", 4);
    let h = Harness::new(
        git,
        FakeAuthority::new()
            .script("a", DryRunScript::Verdict(verdict("chg-a", true)))
            .script("b", DryRunScript::Verdict(verdict("chg-b", true))),
        ScriptedPrompter::choosing(ChannelKind::Cancel),
    );
    let code = h.guard(POLICY).run("branch", &args("-D a b")).await.unwrap();

    assert_eq!(code, 1);
    assert!(h.git.runs().is_empty());
    assert_eq!(h.authority.dry_run_count(), 2);
    assert_eq!(h.prompter.prompts(), 1, "batch stops at the first cancel");

    let entries = h.audit.entries();
    assert_eq!(entries[0].reason, "user_cancelled");
    assert_eq!(entries[1].outcome, Outcome::Cancelled);
    assert_eq!(entries[1].reason, "batch_aborted");

    let counts = h.confirmation_counts();
    assert_eq!(counts.get("chg-a"), Some(&1));
    assert_eq!(counts.get("chg-b"), Some(&1));
    assert!(h
        .authority
        .confirmations()
        .iter()
        .all(|c| c.status == ConfirmationStatus::Cancelled));
    assert_one_record_per_target(&h, 2);
}

#[tokio::test]
async fn test_one_failed_dry_run_blocks_the_batch() {
    let git = FakeGit::on_branch("work")
        .with_ref("a", "a1")
        .with_ref("b", "b1")
        .with_count("m0", "a1", 1)
        .with_count("m0", "b1", 1);
    let h = Harness::new(
        git,
        FakeAuthority::new()
            .script("a", DryRunScript::Verdict(verdict("chg-a", true)))
            .script("b", DryRunScript::Status(500)),
        ScriptedPrompter::choosing(ChannelKind::DirectWait),
    );
    let code = h.guard(POLICY).run("branch", &args("-D a b")).await.unwrap();

    assert_eq!(code, 1);
    assert!(h.git.runs().is_empty());
    assert_eq!(h.prompter.prompts(), 0);

    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::Blocked);
    assert_eq!(entries[0].reason, "batch_aborted");
    assert_eq!(entries[1].outcome, Outcome::BlockedApiError);
    assert_eq!(entries[1].reason, "api_error");

    let confirmations = h.authority.confirmations();
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].change_id, "chg-a");
    assert_eq!(confirmations[0].status, ConfirmationStatus::Cancelled);
}

#[tokio::test]
async fn test_git_failure_after_clearance_propagates_exit_code() {
    let h = Harness::new(
        FakeGit::on_branch("feature").exiting_with(128),
        FakeAuthority::new().script("feature", DryRunScript::Verdict(verdict("chg-f", false))),
        ScriptedPrompter::choosing(ChannelKind::Cancel),
    );
    let code = h
        .guard(POLICY)
        .run("push", &args("--force origin feature"))
        .await
        .unwrap();

    assert_eq!(code, 128);
    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::Failed);
    assert_eq!(entries[0].reason, "command_failed");
    assert_eq!(entries[0].exit_code, Some(128));

    let confirmations = h.authority.confirmations();
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].status, ConfirmationStatus::Failed);
    assert_eq!(confirmations[0].metadata["exit_code"], 128);
    assert_eq!(h.metrics.events()[0].category, MetricCategory::OperationFailed);
}

#[tokio::test]
async fn test_monitor_mode_never_contacts_authority() {
    let h = Harness::new(
        FakeGit::on_branch("main"),
        FakeAuthority::new(),
        ScriptedPrompter::choosing(ChannelKind::Cancel),
    );
    let code = h
        .guard("mode: monitor\nrules:\n  commit_no_verify:\n    action: block\n")
        .run("commit", &args("-n -m wip"))
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(h.authority.dry_run_count(), 0);
    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::Executed);
    assert_eq!(entries[0].reason, "protection_disabled");
    assert_eq!(h.metrics.events()[0].category, MetricCategory::OperationWarned);
}

#[tokio::test]
async fn test_excluded_branch_skips_everything() {
    let git = FakeGit::on_branch("work")
        .with_ref("tmp/spike", "t1")
        .with_count("m0", "t1", 9);
    let h = Harness::new(git, FakeAuthority::new(), ScriptedPrompter::choosing(ChannelKind::Cancel));
    let code = h.guard(POLICY).run("branch", &args("-D tmp/spike")).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(h.authority.dry_run_count(), 0);
    assert_eq!(h.audit.entries()[0].reason, "excluded_pattern");
}

#[tokio::test]
async fn test_warned_reset_runs_without_remote() {
    let git = FakeGit::on_branch("feature")
        .with_ref("HEAD~1", "h1")
        .with_count("h1", "h0", 1);
    let h = Harness::new(git, FakeAuthority::new(), ScriptedPrompter::choosing(ChannelKind::Cancel));
    let code = h.guard(POLICY).run("reset", &args("--hard HEAD~1")).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(h.authority.dry_run_count(), 0);
    assert!(h.git.runs()[0].env.is_empty());
    let entries = h.audit.entries();
    assert_eq!(entries[0].outcome, Outcome::Executed);
    assert_eq!(entries[0].reason, "policy_warn");
}

#[tokio::test]
async fn test_unknown_commands_pass_through_unaudited() {
    let h = Harness::new(
        FakeGit::on_branch("main"),
        FakeAuthority::new(),
        ScriptedPrompter::choosing(ChannelKind::Cancel),
    );
    let code = h.guard(POLICY).run("status", &args("--short")).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(h.git.runs().len(), 1);
    assert_eq!(h.git.runs()[0].subcommand, "status");
    assert!(h.audit.entries().is_empty());
}
