//! The operation-guard pipeline for one git invocation.
//!
//! classify → gather context → resolve each target → dry-run the targets that
//! need approval → approve them one at a time → run git once → confirm.
//!
//! A local block anywhere aborts the whole batch before the authority is
//! contacted. Any authority failure or cancelled approval aborts it too, and
//! every change id already issued is confirmed `cancelled`. Each guarded target
//! ends with exactly one audit entry and one metrics event.

use crate::approval::types::ApprovalRequest;
use crate::approval::{ApprovalOrchestrator, ApprovalOutcome, CancelReason};
use crate::audit::{AuditSink, LogEntry, Outcome, GUARD_EVENT};
use crate::authority::{Confirmation, ConfirmationLedger, RemoteVerdict, RiskAuthority};
use crate::git::{classify, ContextGatherer, GitBackend, OperationDescriptor, RepositoryContext};
use crate::guard::execution::{
    approval_env, confirm_execution, run_git, Clearance, PendingApproval,
};
use crate::guard::preview::dry_run_request;
use crate::metrics::{emit_quietly, MetricCategory, MetricEvent, MetricsSink};
use crate::policy::{EnforcementAction, EnforcementDecision, GuardSkip, PolicyEngine, TargetDecision};
use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use futures_util::future::join_all;
use std::sync::Arc;

/// Reason tag for targets dropped because another target in the batch stopped it.
pub const BATCH_ABORTED: &str = "batch_aborted";

/// Collaborators of the guard. Tests swap every one of them for a fake.
pub struct GuardDeps {
    pub git: Arc<dyn GitBackend>,
    pub authority: Arc<dyn RiskAuthority>,
    /// Must be the same ledger the approval orchestrator confirms through
    pub ledger: Arc<ConfirmationLedger>,
    pub approvals: ApprovalOrchestrator,
    pub audit: Arc<dyn AuditSink>,
    pub metrics: Arc<dyn MetricsSink>,
}

pub struct Guard {
    engine: PolicyEngine,
    git: Arc<dyn GitBackend>,
    authority: Arc<dyn RiskAuthority>,
    ledger: Arc<ConfirmationLedger>,
    approvals: ApprovalOrchestrator,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
    invocation_id: String,
}

/// Where one target stands while the batch resolves.
struct TargetState {
    target: String,
    decision: EnforcementDecision,
    settled: Option<(Outcome, String)>,
    risk_score: f64,
    preview: String,
    verdict: Option<RemoteVerdict>,
}

impl TargetState {
    fn settle(&mut self, outcome: Outcome, reason: impl Into<String>) {
        self.settled = Some((outcome, reason.into()));
    }

    fn change_id(&self) -> Option<&str> {
        self.verdict.as_ref().map(|v| v.change_id.as_str())
    }

    /// Still on its way to execution (or not yet decided).
    fn is_open(&self) -> bool {
        self.settled.as_ref().map_or(true, |(o, _)| o.ran_git())
    }

    fn pending(&self) -> Option<PendingApproval> {
        let verdict = self.verdict.as_ref()?;
        let clearance = match self.settled.as_ref()?.0 {
            Outcome::Approved => Clearance::Approved,
            Outcome::Bypassed => Clearance::Bypassed,
            Outcome::ApiAllows => Clearance::ApiAllows,
            _ => return None,
        };
        Some(PendingApproval {
            change_id: verdict.change_id.clone(),
            target: self.target.clone(),
            clearance,
            revert_url: verdict.revert_url.clone(),
        })
    }
}

impl From<TargetDecision> for TargetState {
    fn from(td: TargetDecision) -> Self {
        Self {
            risk_score: td.decision.risk_score,
            target: td.target,
            decision: td.decision,
            settled: None,
            preview: String::new(),
            verdict: None,
        }
    }
}

impl Guard {
    pub fn new(engine: PolicyEngine, deps: GuardDeps) -> Self {
        Self {
            engine,
            git: deps.git,
            authority: deps.authority,
            ledger: deps.ledger,
            approvals: deps.approvals,
            audit: deps.audit,
            metrics: deps.metrics,
            invocation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// Guard and run one git command. Returns the exit code for the process.
    pub async fn run(&self, subcommand: &str, args: &[String]) -> Result<i32> {
        let descriptor = classify(subcommand, args);
        if !descriptor.is_interceptable() {
            tracing::debug!("passing through git {}", subcommand);
            return run_git(self.git.clone(), subcommand, args, Vec::new()).await;
        }

        let policy = self.engine.policy();
        let ctx = ContextGatherer::new(
            self.git.as_ref(),
            policy.protected_branches.clone(),
            policy.default_branch.clone(),
        )
        .gather(&descriptor)?;

        let mut states: Vec<TargetState> = self
            .engine
            .evaluate(&descriptor, &ctx)
            .into_iter()
            .map(TargetState::from)
            .collect();

        // Local block wins over everything, including the authority.
        if states.iter().any(|s| s.decision.should_block) {
            for s in &mut states {
                if s.decision.should_block {
                    say_blocked(&format!(
                        "{} on '{}' ({} rule: block{})",
                        descriptor.command_line(),
                        s.target,
                        descriptor.kind,
                        reason_suffix(&s.decision.reasons)
                    ));
                    s.settle(Outcome::Blocked, "policy_block");
                } else {
                    s.settle(Outcome::Blocked, BATCH_ABORTED);
                }
            }
            self.record_all(&descriptor, &ctx, &states, None);
            return Ok(1);
        }

        for s in states.iter_mut().filter(|s| s.decision.is_permitted_locally()) {
            if s.decision.action == EnforcementAction::Warn {
                say_warning(&format!(
                    "{} on '{}': risk {:.1}/10{}",
                    descriptor.command_line(),
                    s.target,
                    s.decision.risk_score,
                    reason_suffix(&s.decision.reasons)
                ));
            }
            let reason = local_reason(&s.decision);
            s.settle(Outcome::Executed, reason);
        }

        if !self.dry_run_all(&descriptor, &ctx, &mut states).await {
            self.abort_batch(&mut states, Outcome::Blocked).await;
            self.record_all(&descriptor, &ctx, &states, None);
            return Ok(1);
        }

        if !self.approve_all(&descriptor, &mut states).await {
            self.abort_batch(&mut states, Outcome::Cancelled).await;
            self.record_all(&descriptor, &ctx, &states, None);
            return Ok(1);
        }

        let pending: Vec<PendingApproval> = states.iter().filter_map(|s| s.pending()).collect();
        let revert_hints: Vec<(String, String)> = pending
            .iter()
            .filter_map(|p| p.revert_url.clone().map(|u| (p.target.clone(), u)))
            .collect();

        let exit_code =
            match run_git(self.git.clone(), subcommand, args, approval_env(&pending)).await {
                Ok(code) => code,
                Err(e) => {
                    tracing::error!("failed to run git: {:#}", e);
                    say_blocked(&format!("could not run git: {:#}", e));
                    1
                }
            };

        confirm_execution(&self.ledger, pending, exit_code).await;

        if exit_code != 0 {
            for s in &mut states {
                s.settle(Outcome::Failed, "command_failed");
            }
        }
        self.record_all(&descriptor, &ctx, &states, Some(exit_code));

        if exit_code == 0 {
            for (target, url) in revert_hints {
                say_info(&format!("To revert '{}': {}", target, url));
            }
        }
        Ok(exit_code)
    }

    /// Dry-run every target that needs approval, concurrently.
    /// Returns `false` if any call failed; those targets are settled as fail-secure blocks.
    async fn dry_run_all(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &RepositoryContext,
        states: &mut [TargetState],
    ) -> bool {
        let indices: Vec<usize> = states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.settled.is_none() && s.decision.requires_approval)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return true;
        }

        let requests: Vec<_> = indices
            .iter()
            .map(|&i| {
                dry_run_request(
                    descriptor,
                    &states[i].target,
                    ctx,
                    &states[i].decision,
                    &self.invocation_id,
                )
            })
            .collect();
        let results = join_all(requests.iter().map(|r| self.authority.dry_run(r))).await;

        let mut all_ok = true;
        for ((&i, request), result) in indices.iter().zip(requests).zip(results) {
            let state = &mut states[i];
            state.preview = request.human_preview;
            match result {
                Ok(verdict) => {
                    tracing::debug!(
                        target = %state.target,
                        change_id = %verdict.change_id,
                        needs_approval = verdict.needs_approval,
                        "dry run verdict"
                    );
                    state.risk_score = verdict.risk();
                    state.verdict = Some(verdict);
                }
                Err(e) => {
                    tracing::warn!(target = %state.target, "dry run failed: {}", e);
                    say_blocked(&format!(
                        "{} on '{}': risk authority unavailable ({}). Not executed.",
                        descriptor.command_line(),
                        state.target,
                        e
                    ));
                    state.settle(Outcome::BlockedApiError, e.reason_tag());
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    /// Walk verdicts in target order. Returns `false` when an approval was cancelled.
    async fn approve_all(&self, descriptor: &OperationDescriptor, states: &mut [TargetState]) -> bool {
        for state in states.iter_mut() {
            let Some(verdict) = state.verdict.clone() else {
                continue;
            };

            if !verdict.needs_approval {
                state.settle(Outcome::ApiAllows, "api_allows");
                continue;
            }

            if verdict.is_expired(Utc::now()) {
                let reason = CancelReason::Expired.tag();
                say_blocked(&format!(
                    "{} on '{}': approval window for {} has expired. Not executed.",
                    descriptor.command_line(),
                    state.target,
                    verdict.change_id
                ));
                self.ledger
                    .confirm(Confirmation::cancelled(verdict.change_id.as_str(), reason))
                    .await;
                state.settle(Outcome::Cancelled, reason);
                return false;
            }

            let request = ApprovalRequest::from_verdict(
                descriptor.kind,
                &state.target,
                descriptor.command_line(),
                &state.preview,
                &verdict,
            );
            let outcome = self.approvals.obtain(&request).await;
            match outcome {
                ApprovalOutcome::Approved => state.settle(Outcome::Approved, outcome.reason_tag()),
                ApprovalOutcome::Bypassed => {
                    say_warning(&format!("bypass code accepted for '{}'", state.target));
                    state.settle(Outcome::Bypassed, outcome.reason_tag());
                }
                ApprovalOutcome::Cancelled(_) => {
                    say_blocked(&format!(
                        "{} on '{}' was not approved ({}). Not executed.",
                        descriptor.command_line(),
                        state.target,
                        outcome.reason_tag()
                    ));
                    state.settle(Outcome::Cancelled, outcome.reason_tag());
                    return false;
                }
            }
        }
        true
    }

    /// Settle every still-open target as aborted and cancel its change id.
    async fn abort_batch(&self, states: &mut [TargetState], outcome: Outcome) {
        for state in states.iter_mut() {
            if let Some(change_id) = state.change_id().map(str::to_string) {
                self.ledger
                    .confirm(Confirmation::cancelled(change_id, BATCH_ABORTED))
                    .await;
            }
            if state.is_open() {
                state.settle(outcome, BATCH_ABORTED);
            }
        }
    }

    fn record_all(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &RepositoryContext,
        states: &[TargetState],
        exit_code: Option<i32>,
    ) {
        for state in states {
            let (outcome, reason) = match &state.settled {
                Some((outcome, reason)) => (*outcome, reason.clone()),
                None => {
                    tracing::error!(target = %state.target, "target left unsettled");
                    (Outcome::Blocked, BATCH_ABORTED.to_string())
                }
            };

            let entry = LogEntry {
                timestamp: Utc::now(),
                event: GUARD_EVENT.to_string(),
                invocation_id: self.invocation_id.clone(),
                operation: descriptor.kind,
                repo: ctx.repo_slug.clone(),
                target: state.target.clone(),
                command: descriptor.command_line(),
                outcome,
                reason: reason.clone(),
                exit_code: exit_code.filter(|_| outcome.ran_git()),
                change_id: state.change_id().map(str::to_string),
                risk_score: Some(state.risk_score),
            };
            if let Err(e) = self.audit.record(&entry) {
                tracing::error!("Failed to write audit log: {:#}", e);
            }

            emit_quietly(
                self.metrics.as_ref(),
                &MetricEvent {
                    timestamp: entry.timestamp,
                    category: MetricCategory::for_outcome(outcome, state.decision.action),
                    operation: descriptor.kind,
                    reason,
                    risk_score: state.risk_score,
                    repo: ctx.repo_slug.clone(),
                },
            );
        }
    }
}

/// Stable reason tag for a locally permitted target.
fn local_reason(decision: &EnforcementDecision) -> &'static str {
    match &decision.skipped {
        Some(GuardSkip::ExcludedPattern(_)) => return "excluded_pattern",
        Some(GuardSkip::SkipChecks) => return "skip_checks",
        None => {}
    }
    if decision.reasons.first().map(String::as_str) == Some("protection_disabled") {
        "protection_disabled"
    } else if decision.action == EnforcementAction::Warn {
        "policy_warn"
    } else {
        "policy_allow"
    }
}

fn reason_suffix(reasons: &[String]) -> String {
    if reasons.is_empty() {
        String::new()
    } else {
        format!("; {}", reasons.join(", "))
    }
}

fn say_blocked(msg: &str) {
    eprintln!("{} {} {}", "[saferun]".dimmed(), "✗".red().bold(), msg);
}

fn say_warning(msg: &str) {
    eprintln!("{} {} {}", "[saferun]".dimmed(), "⚠".yellow().bold(), msg);
}

fn say_info(msg: &str) {
    eprintln!("{} {}", "[saferun]".dimmed(), msg);
}
