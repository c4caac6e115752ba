//! Core types for the saferun enforcement policy.
//!
//! The action lattice is closed: allow < warn < require_approval < block.
//! Everything the resolver produces is one of these four, never a free-form string.

use crate::git::OperationKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The local policy verdict for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementAction {
    Allow,
    Warn,
    RequireApproval,
    Block,
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcementAction::Allow => write!(f, "allow"),
            EnforcementAction::Warn => write!(f, "warn"),
            EnforcementAction::RequireApproval => write!(f, "require_approval"),
            EnforcementAction::Block => write!(f, "block"),
        }
    }
}

impl EnforcementAction {
    /// Parse an action from the policy file. Accepts a few aliases.
    pub fn from_str_loose(s: &str) -> Option<EnforcementAction> {
        match s.to_lowercase().trim() {
            "allow" | "pass" | "off" => Some(EnforcementAction::Allow),
            "warn" | "warning" => Some(EnforcementAction::Warn),
            "require_approval" | "approval" | "approve" | "ask" => {
                Some(EnforcementAction::RequireApproval)
            }
            "block" | "deny" => Some(EnforcementAction::Block),
            _ => None,
        }
    }
}

/// Named protection modes. Each expands to a `ModeSettings` preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Protection off: everything runs, warnings only
    Monitor,
    /// Block what must be blocked, warn instead of asking
    Warn,
    /// Full enforcement with approvals and bypass codes
    Enforce,
    /// Full enforcement, no bypass codes
    Strict,
}

impl Mode {
    pub fn from_str_loose(s: &str) -> Option<Mode> {
        match s.to_lowercase().trim() {
            "monitor" | "monitoring" | "off" => Some(Mode::Monitor),
            "warn" | "warning" => Some(Mode::Warn),
            "enforce" | "standard" | "default" | "block" => Some(Mode::Enforce),
            "strict" | "paranoid" => Some(Mode::Strict),
            _ => None,
        }
    }

    pub fn settings(&self) -> ModeSettings {
        match self {
            Mode::Monitor => ModeSettings {
                block_operations: false,
                require_approval: false,
                show_warnings: true,
                allow_bypass: false,
            },
            Mode::Warn => ModeSettings {
                block_operations: true,
                require_approval: false,
                show_warnings: true,
                allow_bypass: false,
            },
            Mode::Enforce => ModeSettings {
                block_operations: true,
                require_approval: true,
                show_warnings: true,
                allow_bypass: true,
            },
            Mode::Strict => ModeSettings {
                block_operations: true,
                require_approval: true,
                show_warnings: true,
                allow_bypass: false,
            },
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Monitor => "monitor",
            Mode::Warn => "warn",
            Mode::Enforce => "enforce",
            Mode::Strict => "strict",
        };
        write!(f, "{}", s)
    }
}

/// Global switches that gate the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSettings {
    /// `false` is the "protection disabled" escape hatch
    pub block_operations: bool,
    pub require_approval: bool,
    pub show_warnings: bool,
    /// Bypass codes accepted in this mode
    pub allow_bypass: bool,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Mode::Enforce.settings()
    }
}

/// Per-operation-type rule from the policy file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationRule {
    /// Overrides the operation's default action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<EnforcementAction>,

    /// Targets (branch globs) or command lines (`*` wildcards) that skip the guard
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,

    /// Skip every check for this operation type
    #[serde(default)]
    pub skip_checks: bool,

    /// Replaces the computed risk score entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,

    /// reset --hard: discarding more commits than this escalates to approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_commits_back: Option<u32>,

    /// branch delete: more unmerged commits than this escalates to approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unmerged_commits: Option<u32>,
}

/// Remote authority settings that may live in the policy file.
/// Environment variables take precedence (see `config::Settings`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// A complete, validated policy.
#[derive(Debug, Clone, Serialize)]
pub struct Policy {
    pub mode: Mode,
    /// Mode preset with any per-file overrides applied
    pub mode_settings: ModeSettings,
    /// Global bypass switch; a bypass also needs `mode_settings.allow_bypass`
    pub bypass_enabled: bool,
    pub protected_branches: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    pub rules: BTreeMap<OperationKind, OperationRule>,
    pub api: ApiSection,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            mode: Mode::Enforce,
            mode_settings: Mode::Enforce.settings(),
            bypass_enabled: true,
            protected_branches: vec!["main".to_string(), "master".to_string()],
            default_branch: None,
            rules: BTreeMap::new(),
            api: ApiSection::default(),
        }
    }
}

impl Policy {
    pub fn rule(&self, kind: OperationKind) -> Option<&OperationRule> {
        self.rules.get(&kind)
    }

    /// Bypass codes are accepted only when enabled globally AND for the mode.
    pub fn bypass_allowed(&self) -> bool {
        self.bypass_enabled && self.mode_settings.allow_bypass
    }
}

/// Why the guard was skipped entirely for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "pattern")]
pub enum GuardSkip {
    ExcludedPattern(String),
    SkipChecks,
}

/// Output of the enforcement resolver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnforcementDecision {
    pub action: EnforcementAction,
    pub requires_approval: bool,
    pub should_block: bool,
    /// Always within [0, 10]
    pub risk_score: f64,
    /// Ordered reason tags, e.g. `protected_branch:main`, `commits_over_limit:3`
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<GuardSkip>,
}

impl EnforcementDecision {
    /// Build a decision from a final action; flags follow from the action.
    pub fn from_action(action: EnforcementAction, risk_score: f64, reasons: Vec<String>) -> Self {
        let (requires_approval, should_block) = match action {
            EnforcementAction::Allow | EnforcementAction::Warn => (false, false),
            EnforcementAction::RequireApproval => (true, false),
            EnforcementAction::Block => (true, true),
        };
        Self {
            action,
            requires_approval,
            should_block,
            risk_score: clamp_risk(risk_score),
            reasons,
            skipped: None,
        }
    }

    pub fn skipped(skip: GuardSkip) -> Self {
        let reason = match &skip {
            GuardSkip::ExcludedPattern(p) => format!("excluded_pattern:{}", p),
            GuardSkip::SkipChecks => "skip_checks".to_string(),
        };
        let mut decision = Self::from_action(EnforcementAction::Allow, 0.0, vec![reason]);
        decision.skipped = Some(skip);
        decision
    }

    pub fn is_permitted_locally(&self) -> bool {
        matches!(
            self.action,
            EnforcementAction::Allow | EnforcementAction::Warn
        )
    }
}

/// Clamp a risk score into [0, 10]; NaN becomes 0.
pub fn clamp_risk(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 10.0)
    }
}
