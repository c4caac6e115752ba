//! Policy linter: detects common gaps and suggests improvements.
//!
//! When a user runs `saferun check`, the linter scans their policy for:
//! - Guards that are switched off or weakened
//! - Settings that silently have no effect
//! - A missing remote authority, which turns every approval into a block
//!
//! This is the "are you sure your policy is good?" check.

use crate::git::OperationKind;
use crate::policy::defaults::default_action;
use crate::policy::types::*;
use crate::utils::paths::CompiledMatcher;
use colored::Colorize;

/// A lint warning: something the user should know about their policy.
#[derive(Debug)]
pub struct LintWarning {
    pub severity: Severity,
    pub message: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Severity {
    /// Something that could be dangerous
    Warning,
    /// A suggestion for improvement
    Info,
}

impl LintWarning {
    fn warn(msg: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: msg.into(),
            suggestion: None,
        }
    }

    fn warn_with_fix(msg: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: msg.into(),
            suggestion: Some(fix.into()),
        }
    }

    fn info(msg: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: msg.into(),
            suggestion: None,
        }
    }

    /// Format for terminal output.
    pub fn display(&self) -> String {
        let icon = match self.severity {
            Severity::Warning => "⚠".yellow().to_string(),
            Severity::Info => "ℹ".blue().to_string(),
        };
        let mut out = format!("  {} {}", icon, self.message);
        if let Some(ref suggestion) = self.suggestion {
            out.push_str(&format!("\n    {}: {}", "Fix".green(), suggestion));
        }
        out
    }
}

/// Lint a policy. `api_configured` says whether a remote authority URL is
/// known from the file or the environment.
pub fn lint_policy(policy: &Policy, api_configured: bool) -> Vec<LintWarning> {
    let mut warnings = Vec::new();

    check_protection_disabled(policy, &mut warnings);
    check_protected_branches(policy, &mut warnings);
    check_weakened_rules(policy, &mut warnings);
    check_skip_checks(policy, &mut warnings);
    check_excludes_shadow_protection(policy, &mut warnings);
    check_risk_overrides(policy, &mut warnings);
    check_bypass(policy, &mut warnings);
    check_remote_authority(policy, api_configured, &mut warnings);

    warnings
}

fn check_protection_disabled(policy: &Policy, warnings: &mut Vec<LintWarning>) {
    if !policy.mode_settings.block_operations {
        warnings.push(LintWarning::info(format!(
            "Mode '{}' does not stop anything — guarded operations are only logged",
            policy.mode
        )));
    }
}

fn check_protected_branches(policy: &Policy, warnings: &mut Vec<LintWarning>) {
    if policy.protected_branches.is_empty() {
        warnings.push(LintWarning::warn_with_fix(
            "No protected branches — force pushes and resets on main get no extra scrutiny",
            "Add: protected_branches: [main, master]",
        ));
    }
}

/// Rules that lower an operation below its baseline.
fn check_weakened_rules(policy: &Policy, warnings: &mut Vec<LintWarning>) {
    for (kind, rule) in &policy.rules {
        let Some(action) = rule.action else { continue };
        if action >= default_action(*kind) {
            continue;
        }
        match kind {
            OperationKind::CommitNoVerify => warnings.push(LintWarning::warn_with_fix(
                format!("commit_no_verify is set to '{}' — commits can skip hooks", action),
                "Use: commit_no_verify: { action: block }",
            )),
            OperationKind::Push if action == EnforcementAction::Allow => {
                warnings.push(LintWarning::warn_with_fix(
                    "force_push is allowed without approval — remote history can be rewritten silently",
                    "Use: force_push: { action: require_approval }",
                ))
            }
            _ => warnings.push(LintWarning::info(format!(
                "{} is relaxed from '{}' to '{}'",
                kind,
                default_action(*kind),
                action
            ))),
        }
    }
}

fn check_skip_checks(policy: &Policy, warnings: &mut Vec<LintWarning>) {
    for (kind, rule) in &policy.rules {
        if rule.skip_checks {
            warnings.push(LintWarning::warn(format!(
                "{} has skip_checks: true — it is never guarded",
                kind
            )));
        }
    }
}

/// An exclude pattern that also matches a protected branch bypasses its protection.
fn check_excludes_shadow_protection(policy: &Policy, warnings: &mut Vec<LintWarning>) {
    for (kind, rule) in &policy.rules {
        let Ok(matcher) = CompiledMatcher::new(&rule.exclude_patterns) else {
            continue;
        };
        for branch in &policy.protected_branches {
            if let Some(pattern) = matcher.first_match(branch) {
                warnings.push(LintWarning::warn(format!(
                    "{} exclude pattern '{}' matches protected branch '{}'",
                    kind, pattern, branch
                )));
            }
        }
    }
}

fn check_risk_overrides(policy: &Policy, warnings: &mut Vec<LintWarning>) {
    for (kind, rule) in &policy.rules {
        if let Some(score) = rule.risk_score {
            if !(0.0..=10.0).contains(&score) {
                warnings.push(LintWarning::info(format!(
                    "{} risk_score {} is outside 0-10 and will be clamped to {}",
                    kind,
                    score,
                    clamp_risk(score)
                )));
            }
        }
    }
}

fn check_bypass(policy: &Policy, warnings: &mut Vec<LintWarning>) {
    if policy.bypass_enabled && !policy.mode_settings.allow_bypass {
        warnings.push(LintWarning::info(format!(
            "bypass is enabled but mode '{}' does not accept bypass codes",
            policy.mode
        )));
    }
}

fn check_remote_authority(policy: &Policy, api_configured: bool, warnings: &mut Vec<LintWarning>) {
    if !policy.mode_settings.require_approval || api_configured {
        return;
    }
    warnings.push(LintWarning::warn_with_fix(
        "No remote authority configured — operations that need approval will be blocked",
        "Set SAFERUN_API_URL, or add: api: { url: https://... }",
    ));
}
