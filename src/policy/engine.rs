//! Enforcement resolver: turns a classified operation plus repository
//! context into one `EnforcementDecision` per guarded target.
//!
//! Pure decision logic, no I/O. Exclude patterns are compiled once when the
//! engine is built, then reused for every target.
//!
//! Resolution order for one target:
//! 1. exclude pattern / `skip_checks` → allow, nothing else is computed
//! 2. `block_operations: false` → allow (or warn), regardless of rules
//! 3. rule action, else the per-operation baseline
//! 4. context adjustment (protected branches and commit limits escalate,
//!    a fully merged unprotected branch delete relaxes)
//! 5. mode downgrades (`show_warnings`, `require_approval`)

use crate::git::{OperationDescriptor, OperationKind, RepositoryContext};
use crate::policy::defaults::default_action;
use crate::policy::types::*;
use crate::utils::paths::{command_matches, CompiledMatcher};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

/// Pre-compiled policy ready for evaluation.
pub struct PolicyEngine {
    policy: Policy,
    excludes: BTreeMap<OperationKind, CompiledMatcher>,
}

/// Decision for one target of a (possibly multi-target) operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDecision {
    pub target: String,
    pub decision: EnforcementDecision,
}

/// Risk score and context findings for one target, before mode settings apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskAssessment {
    pub score: f64,
    pub reasons: Vec<String>,
    /// Context makes the operation riskier than its baseline
    pub escalate: bool,
    /// Context makes an approval baseline unnecessary
    pub relax: bool,
}

impl PolicyEngine {
    pub fn new(policy: Policy) -> Result<Self> {
        let mut excludes = BTreeMap::new();
        for (kind, rule) in &policy.rules {
            if rule.exclude_patterns.is_empty() {
                continue;
            }
            let matcher = CompiledMatcher::new(&rule.exclude_patterns)
                .with_context(|| format!("Invalid exclude pattern in rule '{}'", kind))?;
            excludes.insert(*kind, matcher);
        }
        Ok(Self { policy, excludes })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Evaluate every guarded target of an operation.
    pub fn evaluate(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &RepositoryContext,
    ) -> Vec<TargetDecision> {
        guarded_targets(descriptor, ctx)
            .into_iter()
            .map(|target| {
                let decision = self.evaluate_target(descriptor, &target, ctx);
                tracing::debug!(
                    operation = %descriptor.kind,
                    target = %target,
                    action = %decision.action,
                    risk = decision.risk_score,
                    "resolved enforcement"
                );
                TargetDecision { target, decision }
            })
            .collect()
    }

    fn evaluate_target(
        &self,
        descriptor: &OperationDescriptor,
        target: &str,
        ctx: &RepositoryContext,
    ) -> EnforcementDecision {
        let rule = self.policy.rule(descriptor.kind);

        if let Some(skip) = self.skip_for(descriptor, target, rule) {
            return EnforcementDecision::skipped(skip);
        }

        let assessment = assess(descriptor, target, ctx, rule);
        resolve(
            &self.policy.mode_settings,
            rule.and_then(|r| r.action),
            default_action(descriptor.kind),
            assessment,
        )
    }

    /// Exclusions are checked before any scoring happens.
    fn skip_for(
        &self,
        descriptor: &OperationDescriptor,
        target: &str,
        rule: Option<&OperationRule>,
    ) -> Option<GuardSkip> {
        let rule = rule?;
        if rule.skip_checks {
            return Some(GuardSkip::SkipChecks);
        }
        if let Some(matcher) = self.excludes.get(&descriptor.kind) {
            if let Some(pattern) = matcher.first_match(target) {
                return Some(GuardSkip::ExcludedPattern(pattern.to_string()));
            }
        }
        let command = descriptor.command_line();
        rule.exclude_patterns
            .iter()
            .find(|p| command_matches(&command, std::slice::from_ref(*p)))
            .map(|p| GuardSkip::ExcludedPattern(p.clone()))
    }
}

/// Combine mode settings, the configured rule and the context assessment.
pub fn resolve(
    settings: &ModeSettings,
    rule_action: Option<EnforcementAction>,
    default_action: EnforcementAction,
    assessment: RiskAssessment,
) -> EnforcementDecision {
    let RiskAssessment {
        score,
        mut reasons,
        escalate,
        relax,
    } = assessment;

    if !settings.block_operations {
        reasons.insert(0, "protection_disabled".to_string());
        let action = if settings.show_warnings {
            EnforcementAction::Warn
        } else {
            EnforcementAction::Allow
        };
        return EnforcementDecision::from_action(action, score, reasons);
    }

    let mut action = rule_action.unwrap_or(default_action);

    if action != EnforcementAction::Block {
        if escalate {
            action = action.max(EnforcementAction::RequireApproval);
        } else if relax && rule_action.is_none() && action == EnforcementAction::RequireApproval {
            action = EnforcementAction::Allow;
            reasons.push("fully_merged".to_string());
        }
    }

    if action == EnforcementAction::Warn && !settings.show_warnings {
        action = EnforcementAction::Allow;
    }

    if action == EnforcementAction::RequireApproval && !settings.require_approval {
        action = if settings.show_warnings {
            EnforcementAction::Warn
        } else {
            EnforcementAction::Allow
        };
    }

    EnforcementDecision::from_action(action, score, reasons)
}

/// Which names one operation guards. Local operations guard the current branch.
pub fn guarded_targets(descriptor: &OperationDescriptor, ctx: &RepositoryContext) -> Vec<String> {
    match descriptor.kind {
        OperationKind::BranchDelete if !descriptor.targets.is_empty() => descriptor.targets.clone(),
        OperationKind::Push if !descriptor.targets.is_empty() => descriptor.targets.clone(),
        _ => vec![ctx.current_branch_name().to_string()],
    }
}

/// Per-operation risk score and context findings.
pub fn assess(
    descriptor: &OperationDescriptor,
    target: &str,
    ctx: &RepositoryContext,
    rule: Option<&OperationRule>,
) -> RiskAssessment {
    let mut a = RiskAssessment::default();
    let protected = ctx.is_protected(target);
    if protected {
        a.reasons.push(format!("protected_branch:{}", target));
        a.escalate = true;
    }

    match descriptor.kind {
        OperationKind::BranchDelete => {
            let unmerged = ctx.ahead_count(target);
            a.score = 3.0 + (unmerged as f64 * 0.4).min(2.0);
            if descriptor.forced {
                a.score += 1.5;
            }
            if protected {
                a.score += 3.0;
            }
            if descriptor.has_flag("remotes") {
                a.reasons.push("remote_tracking_branch".to_string());
            }
            if unmerged > 0 {
                a.reasons.push(format!("unmerged_commits:{}", unmerged));
            }
            let limit = rule.and_then(|r| r.max_unmerged_commits).unwrap_or(0);
            if unmerged > limit {
                if rule.and_then(|r| r.max_unmerged_commits).is_some() {
                    a.reasons.push(format!("unmerged_over_limit:{}", limit));
                    a.escalate = true;
                }
            } else if !protected {
                a.relax = true;
            }
        }
        OperationKind::ResetHard => {
            let discarded = ctx.behind_count(descriptor.reset_target());
            a.score = 4.0 + (discarded as f64 * 0.6).min(3.0);
            if protected {
                a.score += 2.5;
            }
            if discarded > 0 {
                a.reasons.push(format!("commits_discarded:{}", discarded));
            }
            if let Some(limit) = rule.and_then(|r| r.max_commits_back) {
                if discarded > limit {
                    a.reasons.push(format!("commits_over_limit:{}", limit));
                    a.escalate = true;
                }
            }
        }
        OperationKind::Push => {
            a.score = 5.0;
            if protected {
                a.score += 3.0;
            }
            if descriptor.has_flag("force-with-lease") && !descriptor.has_flag("force") {
                a.score -= 1.0;
                a.reasons.push("force_with_lease".to_string());
            } else if descriptor.forced {
                a.reasons.push("force_push".to_string());
            }
            if descriptor.has_flag("delete") || descriptor.has_flag("delete-refspec") {
                a.score += 1.0;
                a.reasons.push("remote_branch_deletion".to_string());
            }
        }
        OperationKind::Clean => {
            a.score = 3.5;
            if descriptor.has_flag("ignored") || descriptor.has_flag("only-ignored") {
                a.score += 1.5;
                a.reasons.push("ignored_files".to_string());
            }
            if protected {
                a.score += 2.0;
            }
        }
        OperationKind::Rebase => {
            a.score = 3.0;
            if descriptor.has_flag("interactive") {
                a.score += 1.0;
                a.reasons.push("interactive".to_string());
            }
            if descriptor.has_flag("onto") {
                a.score += 1.0;
                a.reasons.push("onto".to_string());
            }
            if protected {
                a.score += 2.0;
            }
        }
        OperationKind::CommitNoVerify => {
            a.score = 6.0;
            a.reasons.push("no_verify".to_string());
            if protected {
                a.score += 2.0;
            }
        }
        OperationKind::Unknown => {}
    }

    if let Some(score) = rule.and_then(|r| r.risk_score) {
        a.score = score;
    }
    a.score = clamp_risk(a.score);
    a
}
