//! YAML policy parser for saferun.
//!
//! Parses `.saferun.yaml` into the internal `Policy` struct. Every section is
//! optional; an empty file is the `enforce` preset with `main`/`master` protected.
//!
//! # Example policy file:
//! ```yaml
//! mode: enforce
//! protected_branches: [main, "release/*"]
//! bypass:
//!   enabled: true
//! rules:
//!   reset_hard:
//!     action: warn
//!     max_commits_back: 3
//!   branch_delete:
//!     exclude_patterns: ["tmp/*"]
//!   commit_no_verify:
//!     action: block
//! ```

use crate::git::OperationKind;
use crate::policy::types::*;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Raw YAML representation before conversion to internal types.
#[derive(Debug, Default, Deserialize)]
struct RawPolicy {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    mode_settings: Option<RawModeSettings>,
    #[serde(default)]
    bypass: Option<RawBypass>,
    #[serde(default)]
    protected_branches: Option<StringOrVec>,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    rules: BTreeMap<String, RawRule>,
    #[serde(default)]
    api: Option<ApiSection>,
}

#[derive(Debug, Default, Deserialize)]
struct RawModeSettings {
    block_operations: Option<bool>,
    require_approval: Option<bool>,
    show_warnings: Option<bool>,
    allow_bypass: Option<bool>,
}

/// `bypass: false` or `bypass: { enabled: false }`: both work.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBypass {
    Flag(bool),
    Section {
        #[serde(default = "default_true")]
        enabled: bool,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct RawRule {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    exclude_patterns: Option<StringOrVec>,
    #[serde(default)]
    skip_checks: bool,
    #[serde(default)]
    risk_score: Option<f64>,
    #[serde(default)]
    max_commits_back: Option<u32>,
    #[serde(default)]
    max_unmerged_commits: Option<u32>,
}

/// Allows YAML fields to be either a single string or a list of strings:
/// ```yaml
/// protected_branches: main              # single string: works
/// protected_branches: [main, release/*] # list: also works
/// ```
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrVec {
    Single(String),
    Multiple(Vec<String>),
}

impl StringOrVec {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrVec::Single(s) => vec![s],
            StringOrVec::Multiple(v) => v,
        }
    }
}

/// Parse a YAML policy file from a file path.
pub fn parse_policy_file(path: impl AsRef<Path>) -> Result<Policy> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file: {}", path.display()))?;
    parse_policy_str(&content)
        .with_context(|| format!("Failed to parse policy file: {}", path.display()))
}

/// Parse a YAML policy string into a Policy struct.
pub fn parse_policy_str(yaml: &str) -> Result<Policy> {
    let raw: RawPolicy = if yaml.trim().is_empty() {
        RawPolicy::default()
    } else {
        serde_yaml::from_str::<Option<RawPolicy>>(yaml)
            .context("Invalid YAML syntax in policy file")?
            .unwrap_or_default()
    };

    let mode = match raw.mode.as_deref() {
        Some(m) => Mode::from_str_loose(m).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown mode '{}' (expected monitor, warn, enforce or strict)",
                m
            )
        })?,
        None => Mode::Enforce,
    };

    let mut mode_settings = mode.settings();
    if let Some(overrides) = raw.mode_settings {
        if let Some(v) = overrides.block_operations {
            mode_settings.block_operations = v;
        }
        if let Some(v) = overrides.require_approval {
            mode_settings.require_approval = v;
        }
        if let Some(v) = overrides.show_warnings {
            mode_settings.show_warnings = v;
        }
        if let Some(v) = overrides.allow_bypass {
            mode_settings.allow_bypass = v;
        }
    }

    let bypass_enabled = match raw.bypass {
        Some(RawBypass::Flag(b)) => b,
        Some(RawBypass::Section { enabled }) => enabled,
        None => true,
    };

    let protected_branches = raw
        .protected_branches
        .map(|s| s.into_vec())
        .unwrap_or_else(|| Policy::default().protected_branches);
    for pattern in &protected_branches {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid protected branch pattern '{}'", pattern))?;
    }

    let mut rules = BTreeMap::new();
    for (key, raw_rule) in raw.rules {
        let kind = OperationKind::from_str_loose(&key).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown rule '{}' (expected one of: force_push, branch_delete, reset_hard, clean, rebase, commit_no_verify)",
                key
            )
        })?;
        let rule = convert_rule(kind, raw_rule)
            .with_context(|| format!("Invalid rule '{}'", key))?;
        if rules.insert(kind, rule).is_some() {
            bail!("Rule for {} is defined more than once", kind);
        }
    }

    if let Some(ref branch) = raw.default_branch {
        if branch.trim().is_empty() {
            bail!("'default_branch' must not be empty");
        }
    }

    Ok(Policy {
        mode,
        mode_settings,
        bypass_enabled,
        protected_branches,
        default_branch: raw.default_branch,
        rules,
        api: raw.api.unwrap_or_default(),
    })
}

/// Convert a raw YAML rule into a typed `OperationRule`.
fn convert_rule(kind: OperationKind, raw: RawRule) -> Result<OperationRule> {
    let action = match raw.action.as_deref() {
        Some(a) => Some(
            EnforcementAction::from_str_loose(a)
                .ok_or_else(|| anyhow::anyhow!("Unknown action '{}'", a))?,
        ),
        None => None,
    };

    if raw.max_commits_back.is_some() && kind != OperationKind::ResetHard {
        bail!("'max_commits_back' only applies to reset_hard");
    }
    if raw.max_unmerged_commits.is_some() && kind != OperationKind::BranchDelete {
        bail!("'max_unmerged_commits' only applies to branch_delete");
    }
    if let Some(score) = raw.risk_score {
        if score.is_nan() {
            bail!("'risk_score' must be a number between 0 and 10");
        }
    }

    let exclude_patterns = raw
        .exclude_patterns
        .map(|s| s.into_vec())
        .unwrap_or_default();
    for pattern in &exclude_patterns {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid exclude pattern '{}'", pattern))?;
    }

    Ok(OperationRule {
        action,
        exclude_patterns,
        skip_checks: raw.skip_checks,
        risk_score: raw.risk_score,
        max_commits_back: raw.max_commits_back,
        max_unmerged_commits: raw.max_unmerged_commits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_policy_uses_defaults() {
        let policy = parse_policy_str("").unwrap();
        assert_eq!(policy.mode, Mode::Enforce);
        assert!(policy.bypass_enabled);
        assert_eq!(policy.protected_branches, vec!["main", "master"]);
        assert!(policy.rules.is_empty());
    }

    #[test]
    fn test_parse_full_policy() {
        let yaml = r#"
mode: strict
mode_settings:
  show_warnings: false
bypass:
  enabled: false
protected_branches: [main, "release/*"]
default_branch: main
rules:
  reset_hard:
    action: warn
    max_commits_back: 3
  branch_delete:
    exclude_patterns: "tmp/*"
    max_unmerged_commits: 5
  commit_no_verify:
    action: block
    risk_score: 9.5
api:
  url: https://api.saferun.example
  max_retries: 2
"#;
        let policy = parse_policy_str(yaml).unwrap();
        assert_eq!(policy.mode, Mode::Strict);
        assert!(!policy.mode_settings.show_warnings);
        assert!(policy.mode_settings.require_approval);
        assert!(!policy.bypass_enabled);
        assert_eq!(policy.protected_branches.len(), 2);

        let reset = policy.rule(OperationKind::ResetHard).unwrap();
        assert_eq!(reset.action, Some(EnforcementAction::Warn));
        assert_eq!(reset.max_commits_back, Some(3));

        let delete = policy.rule(OperationKind::BranchDelete).unwrap();
        assert_eq!(delete.exclude_patterns, vec!["tmp/*".to_string()]);
        assert_eq!(delete.action, None);

        assert_eq!(
            policy.rule(OperationKind::CommitNoVerify).unwrap().risk_score,
            Some(9.5)
        );
        assert_eq!(policy.api.max_retries, Some(2));
    }

    #[test]
    fn test_bypass_flag_form() {
        let policy = parse_policy_str("bypass: false").unwrap();
        assert!(!policy.bypass_enabled);
    }

    #[test]
    fn test_rule_key_aliases() {
        let policy = parse_policy_str("rules:\n  push:\n    action: block").unwrap();
        assert_eq!(
            policy.rule(OperationKind::Push).unwrap().action,
            Some(EnforcementAction::Block)
        );
    }

    #[test]
    fn test_reject_unknown_mode() {
        assert!(parse_policy_str("mode: yolo").is_err());
    }

    #[test]
    fn test_reject_unknown_rule() {
        assert!(parse_policy_str("rules:\n  stash_drop:\n    action: block").is_err());
    }

    #[test]
    fn test_reject_unknown_action() {
        assert!(parse_policy_str("rules:\n  clean:\n    action: maybe").is_err());
    }

    #[test]
    fn test_reject_misplaced_limit() {
        let yaml = "rules:\n  clean:\n    max_commits_back: 2";
        assert!(parse_policy_str(yaml).is_err());
    }

    #[test]
    fn test_reject_duplicate_rule_via_alias() {
        let yaml = "rules:\n  push:\n    action: block\n  force_push:\n    action: warn";
        assert!(parse_policy_str(yaml).is_err());
    }

    #[test]
    fn test_reject_bad_glob() {
        assert!(parse_policy_str("protected_branches: ['release/[']").is_err());
    }
}
