//! `saferun check`: validate a policy file and print lint suggestions.

use crate::config::{load_policy, Settings};
use crate::git::OperationKind;
use crate::policy::{self, parser, PolicyEngine};
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

/// Run the `saferun check` command. Without a path the policy is discovered
/// by walking up from the current directory.
pub fn run_check(policy_path: Option<&Path>) -> Result<()> {
    let (policy, path) = match policy_path {
        Some(p) => (parser::parse_policy_file(p)?, Some(p.to_path_buf())),
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            load_policy(&cwd)?
        }
    };
    PolicyEngine::new(policy.clone()).context("Policy parsed but has invalid patterns")?;

    let settings = Settings::load(&policy.api)?;
    let warnings = policy::linter::lint_policy(&policy, settings.api_url.is_some());

    println!();
    println!("  {} Policy is valid!", "✓".green().bold());
    println!(
        "  File:  {}",
        path.as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none (built-in defaults)".to_string())
            .dimmed()
    );
    println!("  Mode:  {}", policy.mode.to_string().cyan());
    println!("  Protected: {}", policy.protected_branches.join(", "));
    println!();
    for (i, kind) in OperationKind::GUARDED.iter().enumerate() {
        println!("  {}. {}", i + 1, describe_rule(&policy, *kind));
    }

    if warnings.is_empty() {
        println!();
        println!("  {} No issues found — policy looks solid.", "✓".green());
    } else {
        println!();
        println!(
            "  {} {} {}:",
            "─".repeat(20).dimmed(),
            warnings.len(),
            if warnings.len() == 1 {
                "suggestion"
            } else {
                "suggestions"
            }
        );
        println!();
        for warning in &warnings {
            println!("{}", warning.display());
        }
    }
    println!();
    Ok(())
}

fn describe_rule(policy: &policy::Policy, kind: OperationKind) -> String {
    let rule = policy.rule(kind);
    let action = rule
        .and_then(|r| r.action)
        .map(|a| a.to_string())
        .unwrap_or_else(|| format!("{} (default)", policy::defaults::default_action(kind)));

    let mut line = format!("{}: {}", kind.as_str().bold(), action);
    if let Some(rule) = rule {
        if rule.skip_checks {
            line.push_str(&format!(" {}", "[checks skipped]".yellow()));
        }
        if !rule.exclude_patterns.is_empty() {
            line.push_str(&format!(", except {}", rule.exclude_patterns.join(", ")));
        }
        if let Some(n) = rule.max_commits_back {
            line.push_str(&format!(", approval past {} commits", n));
        }
        if let Some(n) = rule.max_unmerged_commits {
            line.push_str(&format!(", approval past {} unmerged", n));
        }
        if let Some(score) = rule.risk_score {
            line.push_str(&format!(", risk {:.1}", score));
        }
    }
    line
}

